use clap::Parser;
use session::Format;
use sip_types::uri::{NameAddr, SipUri};
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("registration expiry must be at least one second")]
    ZeroExpiry,
    #[error("refresh margin of {margin}s must be shorter than the expiry of {expiry}s")]
    RefreshMargin { margin: u64, expiry: u64 },
    #[error("RTP port range {min}-{max} does not contain an even/odd port pair")]
    RtpPorts { min: u16, max: u16 },
    #[error("unknown media format {0:?}")]
    UnknownFormat(String),
    #[error("no media format configured")]
    NoFormats,
    #[error("failed to detect local IP address, {0}")]
    LocalIp(#[from] local_ip_address::Error),
}

/// Command line of the agent, every option can also be set through a `SIPUA_*` variable
#[derive(Debug, Parser)]
#[command(author, version, about = "Minimal SIP user agent", long_about = None)]
pub struct Args {
    /// Peer to invite, without it the agent registers and waits for a call
    #[arg(env = "SIPUA_PEER")]
    pub peer: Option<SipUri>,

    /// Registrar the identity is bound at
    #[arg(long, env = "SIPUA_REGISTRAR", default_value = "sip:example.com")]
    pub registrar: SipUri,

    /// Local identity
    #[arg(long, env = "SIPUA_URI", default_value = "sip:demo@example.com")]
    pub uri: SipUri,

    /// Display name of the local identity
    #[arg(long, env = "SIPUA_NAME", default_value = "demo")]
    pub name: String,

    #[arg(long, env = "SIPUA_USERNAME", default_value = "demo")]
    pub username: String,

    #[arg(long, env = "SIPUA_PASSWORD", default_value = "secret", hide_env_values = true)]
    pub password: String,

    /// Requested registration lifetime in seconds
    #[arg(long, env = "SIPUA_EXPIRY", default_value_t = 60)]
    pub expiry: u64,

    /// Refresh the registration this many seconds before it expires
    #[arg(long, env = "SIPUA_REFRESH_MARGIN", default_value_t = 5)]
    pub refresh_margin: u64,

    /// Challenges answered per request
    #[arg(long, env = "SIPUA_MAX_AUTH_RETRIES", default_value_t = 1)]
    pub max_auth_retries: u32,

    /// Address used for SIP and RTP, detected when omitted
    #[arg(long, env = "SIPUA_LOCAL_IP")]
    pub local_ip: Option<IpAddr>,

    /// SIP port, 0 picks a random one
    #[arg(long, env = "SIPUA_SIP_PORT", default_value_t = 0)]
    pub sip_port: u16,

    #[arg(long, env = "SIPUA_RTP_PORT_MIN", default_value_t = 10000)]
    pub rtp_port_min: u16,

    #[arg(long, env = "SIPUA_RTP_PORT_MAX", default_value_t = 30000)]
    pub rtp_port_max: u16,

    /// Media format offered, in priority order (e.g. PCMU, PCMA, G722)
    #[arg(
        long = "format",
        env = "SIPUA_FORMATS",
        value_delimiter = ',',
        default_value = "PCMU"
    )]
    pub formats: Vec<String>,

    /// Seconds to wait for pending transactions when shutting down
    #[arg(long, env = "SIPUA_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,
}

/// Validated configuration of the agent
#[derive(Debug, Clone)]
pub struct Config {
    /// Outbound call target, register mode when `None`
    pub peer: Option<SipUri>,
    pub registrar: SipUri,
    pub id: NameAddr,
    pub username: String,
    pub password: String,
    pub expiry: Duration,
    pub refresh_margin: Duration,
    pub max_auth_retries: u32,
    pub local_ip: IpAddr,
    pub sip_port: u16,
    pub rtp_ports: RangeInclusive<u16>,
    pub formats: Vec<Format>,
    pub shutdown_timeout: Duration,
}

impl Args {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        if self.expiry == 0 {
            return Err(ConfigError::ZeroExpiry);
        }

        if self.refresh_margin >= self.expiry {
            return Err(ConfigError::RefreshMargin {
                margin: self.refresh_margin,
                expiry: self.expiry,
            });
        }

        // at least one even port followed by its odd neighbour
        let first_even = self.rtp_port_min.saturating_add(self.rtp_port_min % 2);
        if first_even >= self.rtp_port_max {
            return Err(ConfigError::RtpPorts {
                min: self.rtp_port_min,
                max: self.rtp_port_max,
            });
        }

        let formats = self
            .formats
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| Format::from_name(name).ok_or_else(|| ConfigError::UnknownFormat(name.into())))
            .collect::<Result<Vec<_>, _>>()?;

        if formats.is_empty() {
            return Err(ConfigError::NoFormats);
        }

        let local_ip = match self.local_ip {
            Some(ip) => ip,
            None => local_ip_address::local_ip()?,
        };

        Ok(Config {
            peer: self.peer,
            registrar: self.registrar,
            id: NameAddr::new(self.name, self.uri),
            username: self.username,
            password: self.password,
            expiry: Duration::from_secs(self.expiry),
            refresh_margin: Duration::from_secs(self.refresh_margin),
            max_auth_retries: self.max_auth_retries,
            local_ip,
            sip_port: self.sip_port,
            rtp_ports: self.rtp_port_min..=self.rtp_port_max,
            formats,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
        })
    }
}
