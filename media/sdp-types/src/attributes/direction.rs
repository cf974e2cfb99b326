use std::fmt;

/// Media direction attribute (`a=sendrecv`, `a=recvonly`, `a=sendonly`, `a=inactive`)
///
/// Session or Media-Level attribute, defaults to `sendrecv` when absent
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-6.7)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    #[default]
    SendRecv,
    RecvOnly,
    SendOnly,
    Inactive,
}

impl Direction {
    /// Returns the direction if the attribute name is one
    pub fn from_attribute(name: &str) -> Option<Self> {
        match name {
            "sendrecv" => Some(Self::SendRecv),
            "recvonly" => Some(Self::RecvOnly),
            "sendonly" => Some(Self::SendOnly),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    /// Direction as seen from the other side
    pub fn flipped(self) -> Self {
        match self {
            Self::SendRecv => Self::SendRecv,
            Self::RecvOnly => Self::SendOnly,
            Self::SendOnly => Self::RecvOnly,
            Self::Inactive => Self::Inactive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendRecv => "sendrecv",
            Self::RecvOnly => "recvonly",
            Self::SendOnly => "sendonly",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn direction_attribute() {
        assert_eq!(Direction::from_attribute("recvonly"), Some(Direction::RecvOnly));
        assert_eq!(Direction::from_attribute("rtpmap"), None);
        assert_eq!(Direction::RecvOnly.flipped(), Direction::SendOnly);
        assert_eq!(Direction::default().to_string(), "sendrecv");
    }
}
