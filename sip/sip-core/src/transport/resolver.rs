//! Resolve SIP URIs into socket addresses (RFC 3263 without NAPTR)

use crate::{Error, Result};
use hickory_resolver::proto::rr::rdata::SRV;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::{Name, ResolveError, TokioResolver};
use multimap::MultiMap;
use sip_types::host::Host;
use sip_types::uri::SipUri;
use std::io;
use std::net::{IpAddr, SocketAddr};

pub const DEFAULT_PORT: u16 = 5060;

/// A resolved address and the transport it was advertised for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEntry {
    pub address: SocketAddr,
    pub transport: Option<TransportKind>,
}

impl<S> From<S> for ServerEntry
where
    SocketAddr: From<S>,
{
    fn from(address: S) -> Self {
        Self {
            address: SocketAddr::from(address),
            transport: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Tcp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
        }
    }
}

/// Lazily created DNS resolver
#[derive(Default)]
pub struct Resolver {
    dns: Option<TokioResolver>,
}

impl Resolver {
    pub fn new(dns: TokioResolver) -> Self {
        Self { dns: Some(dns) }
    }

    /// Resolve the host part of an uri into a non-empty list of server entries
    #[tracing::instrument(level = "debug", skip_all, fields(%uri))]
    pub async fn resolve_uri(&mut self, uri: &SipUri) -> Result<Vec<ServerEntry>> {
        let explicit_port = uri.host_port.port;
        let port = explicit_port.unwrap_or(DEFAULT_PORT);

        let name = match &uri.host_port.host {
            Host::IP4(ip) => return Ok(vec![ServerEntry::from((*ip, port))]),
            Host::IP6(ip) => return Ok(vec![ServerEntry::from((*ip, port))]),
            Host::Name(name) => name,
        };

        if self.dns.is_none() {
            let dns = TokioResolver::builder_tokio()
                .map_err(|e| Error::Resolve(format!("{name}, system dns config {e}")))?
                .build();

            self.dns = Some(dns);
        }

        let Some(dns) = &self.dns else {
            return Err(Error::Resolve(name.to_string()));
        };

        resolve_host(dns, name, explicit_port)
            .await
            .map_err(|e| Error::Resolve(format!("{name}, {e}")))
    }
}

async fn resolve_host(
    dns_resolver: &TokioResolver,
    name: &str,
    explicit_port: Option<u16>,
) -> io::Result<Vec<ServerEntry>> {
    log::debug!("Resolving hostname {name:?}");

    let name = Name::from_utf8(name)?;

    let mut entries: Vec<ServerEntry> = vec![];

    // SRV records are only consulted when the uri has no explicit port
    if explicit_port.is_none() {
        let records = [
            (Name::from_utf8(format!("_sip._udp.{name}"))?, TransportKind::Udp),
            (Name::from_utf8(format!("_sip._tcp.{name}"))?, TransportKind::Tcp),
        ];

        for (name, transport) in records {
            resolve_srv_records(dns_resolver, name, Some(transport), &mut entries).await?;
        }
    }

    if entries.is_empty() {
        let port = explicit_port.unwrap_or(DEFAULT_PORT);
        resolve_a_records(dns_resolver, name.clone(), None, port, &mut entries).await?;
    }

    if entries.is_empty() {
        return Err(io::Error::other(format!(
            "No DNS records for host '{name}' found"
        )));
    }

    Ok(entries)
}

async fn resolve_srv_records(
    dns_resolver: &TokioResolver,
    name: Name,
    transport: Option<TransportKind>,
    entries: &mut Vec<ServerEntry>,
) -> Result<(), ResolveError> {
    log::debug!("Resolving SRV records for \"{name}\"");

    let Some(lookup) = filter_no_records(dns_resolver.lookup(name.clone(), RecordType::SRV).await)?
    else {
        log::debug!("No SRV records exist for \"{name}\"");
        return Ok(());
    };

    let mut srv_records: Vec<&SRV> = lookup
        .record_iter()
        .filter_map(|record| match record.data() {
            RData::SRV(srv) => Some(srv),
            _ => None,
        })
        .collect();
    srv_records.sort_unstable_by_key(|srv| srv.priority());

    log::debug!("Got {} SRV records for \"{name}\"", srv_records.len());

    // additional A/AAAA records for the targets save another lookup
    let ip_records: MultiMap<&Name, IpAddr> = lookup
        .record_iter()
        .filter_map(|record| match record.data() {
            RData::A(a) => Some((record.name(), IpAddr::from(a.0))),
            RData::AAAA(aaaa) => Some((record.name(), IpAddr::from(aaaa.0))),
            _ => None,
        })
        .collect();

    for record in srv_records {
        let target = record.target();
        let port = record.port();

        if let Some(ips) = ip_records.get_vec(target) {
            entries.extend(ips.iter().map(|ip| ServerEntry {
                address: SocketAddr::new(*ip, port),
                transport,
            }));
        } else {
            resolve_a_records(dns_resolver, target.clone(), transport, port, entries).await?;
        };
    }

    Ok(())
}

async fn resolve_a_records(
    dns_resolver: &TokioResolver,
    name: Name,
    transport: Option<TransportKind>,
    port: u16,
    entries: &mut Vec<ServerEntry>,
) -> Result<(), ResolveError> {
    log::debug!("Resolving A/AAAA records for \"{name}\"");

    let Some(lookup) = filter_no_records(dns_resolver.lookup_ip(name.clone()).await)? else {
        log::debug!("No A/AAAA records exist for \"{name}\"");
        return Ok(());
    };

    entries.extend(lookup.iter().map(|ip| ServerEntry {
        address: SocketAddr::new(ip, port),
        transport,
    }));

    Ok(())
}

/// Filter out errors where no records for a given name weren't found and instead return an Ok(None)
fn filter_no_records<T>(e: Result<T, ResolveError>) -> Result<Option<T>, ResolveError> {
    match e {
        Ok(t) => Ok(Some(t)),
        Err(e) if e.proto().is_some_and(|p| p.is_no_records_found()) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn ip_literal_without_dns() {
        let mut resolver = Resolver::default();

        let uri: SipUri = "sip:bob@192.168.1.2".parse().unwrap();
        let entries = resolver.resolve_uri(&uri).await.unwrap();
        assert_eq!(entries, vec![ServerEntry::from(([192, 168, 1, 2], 5060))]);

        let uri: SipUri = "sip:[::1]:5070".parse().unwrap();
        let entries = resolver.resolve_uri(&uri).await.unwrap();
        assert_eq!(entries[0].address, "[::1]:5070".parse().unwrap());

        assert!(resolver.dns.is_none());
    }
}
