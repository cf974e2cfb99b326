use std::fmt;

/// Classification of a [`StatusCode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Provisional,
    Success,
    Redirection,
    RequestFailure,
    ServerFailure,
    GlobalFailure,
    Custom,
}

/// Status code of a SIP response
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(u16);

macro_rules! codes {
    ($($code:literal, $name:ident, $text:literal;)+) => {
        impl StatusCode {
            $(pub const $name: StatusCode = StatusCode($code);)+

            /// Returns the default reason phrase of well known codes
            pub fn text(self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some($text),)+
                    _ => None,
                }
            }
        }
    };
}

codes! {
    100, TRYING, "Trying";
    180, RINGING, "Ringing";
    181, CALL_IS_BEING_FORWARDED, "Call Is Being Forwarded";
    182, QUEUED, "Queued";
    183, SESSION_PROGRESS, "Session Progress";

    200, OK, "OK";
    202, ACCEPTED, "Accepted";

    300, MULTIPLE_CHOICES, "Multiple Choices";
    301, MOVED_PERMANENTLY, "Moved Permanently";
    302, MOVED_TEMPORARILY, "Moved Temporarily";

    400, BAD_REQUEST, "Bad Request";
    401, UNAUTHORIZED, "Unauthorized";
    403, FORBIDDEN, "Forbidden";
    404, NOT_FOUND, "Not Found";
    405, METHOD_NOT_ALLOWED, "Method Not Allowed";
    407, PROXY_AUTHENTICATION_REQUIRED, "Proxy Authentication Required";
    408, REQUEST_TIMEOUT, "Request Timeout";
    415, UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type";
    423, INTERVAL_TOO_BRIEF, "Interval Too Brief";
    480, TEMPORARILY_UNAVAILABLE, "Temporarily Unavailable";
    481, CALL_OR_TRANSACTION_DOES_NOT_EXIST, "Call/Transaction Does Not Exist";
    486, BUSY_HERE, "Busy Here";
    487, REQUEST_TERMINATED, "Request Terminated";
    488, NOT_ACCEPTABLE_HERE, "Not Acceptable Here";

    500, SERVER_INTERNAL_ERROR, "Server Internal Error";
    501, NOT_IMPLEMENTED, "Not Implemented";
    503, SERVICE_UNAVAILABLE, "Service Unavailable";
    504, SERVER_TIMEOUT, "Server Time-out";

    600, BUSY_EVERYWHERE, "Busy Everywhere";
    603, DECLINE, "Decline";
}

impl StatusCode {
    pub const fn from_u16(code: u16) -> Self {
        Self(code)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }

    pub fn kind(self) -> CodeKind {
        match self.0 {
            100..=199 => CodeKind::Provisional,
            200..=299 => CodeKind::Success,
            300..=399 => CodeKind::Redirection,
            400..=499 => CodeKind::RequestFailure,
            500..=599 => CodeKind::ServerFailure,
            600..=699 => CodeKind::GlobalFailure,
            _ => CodeKind::Custom,
        }
    }

    pub fn is_final(self) -> bool {
        !matches!(self.kind(), CodeKind::Provisional)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
