use super::name::Name;
use super::{ConstNamed, HeaderError, HeaderParse};
use crate::parse::split_list;
use bytesstr::BytesStr;
use std::fmt;

/// Ordered list of the headers of a message.
///
/// Values are kept as raw strings and decoded on access.
#[derive(Debug, Default, Clone)]
pub struct Headers {
    entries: Vec<(Name, BytesStr)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &BytesStr)> {
        self.entries.iter().map(|(name, value)| (name, value))
    }

    /// Append a raw value
    pub fn insert<V: Into<BytesStr>>(&mut self, name: Name, value: V) {
        self.entries.push((name, value.into()));
    }

    /// Append a value under the given name
    pub fn insert_type<H: fmt::Display>(&mut self, name: Name, header: &H) {
        self.insert(name, header.to_string());
    }

    pub fn insert_named<H: ConstNamed + fmt::Display>(&mut self, header: &H) {
        self.insert_type(H::NAME, header);
    }

    /// Insert a value before all existing ones
    pub fn insert_named_front<H: ConstNamed + fmt::Display>(&mut self, header: &H) {
        self.entries.insert(0, (H::NAME, header.to_string().into()));
    }

    /// Replace all values of `H` with the given one
    pub fn replace_named<H: ConstNamed + fmt::Display>(&mut self, header: &H) {
        self.remove(&H::NAME);
        self.insert_named(header);
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn remove(&mut self, name: &Name) {
        self.entries.retain(|(n, _)| n != name);
    }

    /// Returns the first raw value of `name`
    pub fn get(&self, name: &Name) -> Option<&BytesStr> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    pub fn get_all<'a>(&'a self, name: &'a Name) -> impl Iterator<Item = &'a BytesStr> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Decode the first value of `name`
    pub fn get_type<H: HeaderParse>(&self, name: &Name) -> Result<H, HeaderError> {
        let value = self
            .get(name)
            .ok_or_else(|| HeaderError::Missing(name.clone()))?;

        if H::LIST {
            let first = split_list(value)
                .next()
                .ok_or_else(|| HeaderError::malformed(name.clone(), value))?;

            let first = BytesStr::from_parse(value.as_ref(), first);

            H::parse_value(&first).ok_or_else(|| HeaderError::malformed(name.clone(), value))
        } else {
            H::parse_value(value).ok_or_else(|| HeaderError::malformed(name.clone(), value))
        }
    }

    /// Decode all values of `name`, splitting comma separated lists
    pub fn get_all_type<H: HeaderParse>(&self, name: &Name) -> Result<Vec<H>, HeaderError> {
        let mut out = Vec::new();

        for value in self.get_all(name) {
            if H::LIST {
                for part in split_list(value) {
                    let part = BytesStr::from_parse(value.as_ref(), part);

                    out.push(
                        H::parse_value(&part)
                            .ok_or_else(|| HeaderError::malformed(name.clone(), value))?,
                    );
                }
            } else {
                out.push(
                    H::parse_value(value)
                        .ok_or_else(|| HeaderError::malformed(name.clone(), value))?,
                );
            }
        }

        Ok(out)
    }

    pub fn get_named<H: ConstNamed + HeaderParse>(&self) -> Result<H, HeaderError> {
        self.get_type(&H::NAME)
    }

    pub fn get_all_named<H: ConstNamed + HeaderParse>(&self) -> Result<Vec<H>, HeaderError> {
        self.get_all_type(&H::NAME)
    }

    /// Copies all values of `name` from `other` to the end of this list
    pub fn copy_from(&mut self, other: &Headers, name: &Name) {
        self.entries.extend(
            other
                .entries
                .iter()
                .filter(|(n, _)| n == name)
                .cloned(),
        );
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::typed::{CallId, Via};

    #[test]
    fn insert_and_get() {
        let mut headers = Headers::new();
        headers.insert(Name::CALL_ID, "abc@host");
        headers.insert(Name::from("X-Test"), "1");

        let call_id: CallId = headers.get_named().unwrap();
        assert_eq!(&*call_id.0, "abc@host");
        assert_eq!(headers.to_string(), "Call-ID: abc@host\r\nX-Test: 1\r\n");
    }

    #[test]
    fn missing_header() {
        let headers = Headers::new();

        assert!(matches!(
            headers.get_named::<CallId>(),
            Err(HeaderError::Missing(name)) if name == Name::CALL_ID
        ));
    }

    #[test]
    fn list_values() {
        let mut headers = Headers::new();
        headers.insert(
            Name::VIA,
            "SIP/2.0/UDP 10.0.0.1;branch=z9hG4bKa, SIP/2.0/TCP 10.0.0.2:5070;branch=z9hG4bKb",
        );
        headers.insert(Name::from("v"), "SIP/2.0/UDP 10.0.0.3;branch=z9hG4bKc");

        let top: Via = headers.get_named().unwrap();
        assert_eq!(top.branch().unwrap(), "z9hG4bKa");

        let all: Vec<Via> = headers.get_all_named().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(&*all[1].transport, "TCP");
    }

    #[test]
    fn insert_front_and_remove() {
        let mut headers = Headers::new();
        headers.insert(Name::VIA, "SIP/2.0/UDP 10.0.0.1;branch=z9hG4bKa");
        headers.insert_named_front(&CallId::new("first"));

        assert_eq!(headers.iter().next().unwrap().0, &Name::CALL_ID);

        headers.remove(&Name::VIA);
        assert_eq!(headers.len(), 1);
    }

    /// The value outlives the name it was looked up with
    fn first_value(headers: &Headers, name: &str) -> Option<BytesStr> {
        let value = {
            let name = Name::from(name);
            headers.get(&name)
        };

        value.cloned()
    }

    #[test]
    fn get_returns_first_value() {
        let mut headers = Headers::new();
        headers.insert(Name::from("X-Test"), "1");
        headers.insert(Name::from("X-Test"), "2");

        assert_eq!(first_value(&headers, "x-test").as_deref(), Some("1"));
        assert_eq!(first_value(&headers, "X-Other"), None);
    }
}
