use hickory_resolver::error::ResolveError as DnsResolveError;
use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;

use crate::{jid, minidom, normalize::NormalizationError, state::FailureReason};

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(IoError),
    /// Error parsing Jabber-Id
    JidParse(jid::Error),
    /// String preparation or IDNA conversion of an identifier failed
    Normalization(NormalizationError),
    /// Protocol-level error
    Protocol(ProtocolError),
    /// Authentication error
    Auth(AuthError),
    /// StartTLS negotiation error
    Tls(TlsError),
    /// DNS resolution error
    Resolve(DnsResolveError),
    /// Every candidate target refused the connection
    NoReachableHost,
    /// The server closed the stream with a `<stream:error/>`
    StreamError {
        /// Defined condition, e.g. `host-unknown`
        condition: String,
        /// Optional human-readable description
        text: Option<String>,
    },
    /// A request-style stanza was sent while the connection was not ready
    NotConnected,
    /// A request id was registered while another request with the same id
    /// was still pending
    DuplicateId(String),
    /// Connection closed
    Disconnected,
    /// The connection ended in the `Failed` state
    Failed(FailureReason),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(fmt, "IO error: {}", e),
            Error::JidParse(e) => write!(fmt, "jid parse error: {}", e),
            Error::Normalization(e) => write!(fmt, "normalization error: {}", e),
            Error::Protocol(e) => write!(fmt, "protocol error: {}", e),
            Error::Auth(e) => write!(fmt, "authentication error: {}", e),
            Error::Tls(e) => write!(fmt, "TLS negotiation error: {}", e),
            Error::Resolve(e) => write!(fmt, "{:?}", e),
            Error::NoReachableHost => write!(fmt, "no reachable host"),
            Error::StreamError { condition, text } => match text {
                Some(text) => write!(fmt, "stream error: {} ({})", condition, text),
                None => write!(fmt, "stream error: {}", condition),
            },
            Error::NotConnected => write!(fmt, "not connected"),
            Error::DuplicateId(id) => write!(fmt, "request id {:?} is already pending", id),
            Error::Disconnected => write!(fmt, "disconnected"),
            Error::Failed(reason) => write!(fmt, "connection failed: {}", reason),
        }
    }
}

impl StdError for Error {}

impl Error {
    /// The reason a connection carries into its terminal `Failed` state
    /// when negotiation or the read loop stops with this error.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Error::NoReachableHost => FailureReason::NoReachableHost,
            Error::Tls(e) => FailureReason::TlsNegotiationFailed(e.to_string()),
            Error::Auth(e) => FailureReason::AuthenticationFailed(e.to_string()),
            Error::StreamError { condition, text } => FailureReason::StreamError {
                condition: condition.clone(),
                text: text.clone(),
            },
            Error::Io(e) => FailureReason::TransportError(e.to_string()),
            Error::Resolve(e) => FailureReason::TransportError(format!("{:?}", e)),
            Error::Disconnected => FailureReason::TransportError("connection closed".to_owned()),
            Error::Protocol(e) => FailureReason::ProtocolViolation(e.to_string()),
            Error::JidParse(e) => FailureReason::ProtocolViolation(e.to_string()),
            Error::Normalization(e) => FailureReason::ProtocolViolation(e.to_string()),
            Error::Failed(reason) => reason.clone(),
            Error::NotConnected | Error::DuplicateId(_) => {
                FailureReason::ProtocolViolation(self.to_string())
            }
        }
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::JidParse(e)
    }
}

impl From<NormalizationError> for Error {
    fn from(e: NormalizationError) -> Self {
        Error::Normalization(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

impl From<TlsError> for Error {
    fn from(e: TlsError) -> Self {
        Error::Tls(e)
    }
}

impl From<DnsResolveError> for Error {
    fn from(e: DnsResolveError) -> Error {
        Error::Resolve(e)
    }
}

/// XMPP protocol-level error
#[derive(Debug)]
pub enum ProtocolError {
    /// XML parser error
    Parser(minidom::Error),
    /// `<stream:stream>` header with the wrong name, namespace or version
    InvalidStreamStart,
    /// Stream header arrived in the middle of a stream
    UnexpectedStreamStart,
    /// Received an element the current negotiation step does not expect
    UnexpectedElement(String),
    /// Encountered an unexpected XML token
    InvalidToken,
    /// SASL payload was not valid base64
    InvalidBase64(base64::DecodeError),
    /// Invalid response to resource binding
    InvalidBindResponse,
    /// The server answered the bind request with an error
    BindRejected(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::Parser(e) => write!(fmt, "XML parser error: {}", e),
            ProtocolError::InvalidStreamStart => write!(fmt, "invalid <stream:stream> header"),
            ProtocolError::UnexpectedStreamStart => write!(fmt, "unexpected <stream:stream>"),
            ProtocolError::UnexpectedElement(name) => {
                write!(fmt, "unexpected element <{}/>", name)
            }
            ProtocolError::InvalidToken => write!(fmt, "encountered an unexpected XML token"),
            ProtocolError::InvalidBase64(e) => write!(fmt, "invalid base64 payload: {}", e),
            ProtocolError::InvalidBindResponse => {
                write!(fmt, "invalid response to resource binding")
            }
            ProtocolError::BindRejected(condition) => {
                write!(fmt, "resource binding rejected: {}", condition)
            }
        }
    }
}

impl StdError for ProtocolError {}

impl From<minidom::Error> for ProtocolError {
    fn from(e: minidom::Error) -> Self {
        ProtocolError::Parser(e)
    }
}

impl From<minidom::Error> for Error {
    fn from(e: minidom::Error) -> Self {
        ProtocolError::Parser(e).into()
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        ProtocolError::InvalidBase64(e).into()
    }
}

/// Authentication error
#[derive(Debug)]
pub enum AuthError {
    /// No matching SASL mechanism available
    NoMechanism,
    /// Local authenticator error
    Mechanism(String),
    /// Failure from server
    Fail {
        /// SASL defined condition, e.g. `not-authorized`
        condition: String,
        /// Optional human-readable description
        text: Option<String>,
    },
}

impl StdError for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(fmt, "no matching SASL mechanism available"),
            AuthError::Mechanism(s) => write!(fmt, "local SASL implementation error: {}", s),
            AuthError::Fail {
                condition,
                text: Some(text),
            } => write!(fmt, "failure from the server: {} ({})", condition, text),
            AuthError::Fail {
                condition,
                text: None,
            } => write!(fmt, "failure from the server: {}", condition),
        }
    }
}

/// StartTLS negotiation error
#[derive(Debug)]
pub enum TlsError {
    /// The server answered `<starttls/>` with `<failure/>`
    Refused,
    /// The transport could not be upgraded
    Upgrade(UpgradeError),
    /// TLS is required by local policy but the server did not offer it
    NotOffered,
    /// The server requires TLS but local policy disables it
    RequiredByServer,
}

impl StdError for TlsError {}

impl fmt::Display for TlsError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TlsError::Refused => write!(fmt, "server refused StartTLS"),
            TlsError::Upgrade(e) => write!(fmt, "TLS upgrade failed: {}", e),
            TlsError::NotOffered => write!(fmt, "TLS required but not offered by the server"),
            TlsError::RequiredByServer => {
                write!(fmt, "server requires TLS but it is disabled locally")
            }
        }
    }
}

impl From<UpgradeError> for TlsError {
    fn from(e: UpgradeError) -> Self {
        TlsError::Upgrade(e)
    }
}

impl From<UpgradeError> for Error {
    fn from(e: UpgradeError) -> Self {
        Error::Tls(TlsError::Upgrade(e))
    }
}

/// Failure of a transport's in-place upgrade to an encrypted channel
#[derive(Debug)]
pub enum UpgradeError {
    /// The transport is already encrypted
    AlreadyEncrypted,
    /// The domain is not usable as a TLS server name
    DnsName(String),
    /// Handshake or certificate store error
    Io(IoError),
}

impl StdError for UpgradeError {}

impl fmt::Display for UpgradeError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpgradeError::AlreadyEncrypted => write!(fmt, "transport is already encrypted"),
            UpgradeError::DnsName(name) => write!(fmt, "invalid TLS server name {:?}", name),
            UpgradeError::Io(e) => write!(fmt, "{}", e),
        }
    }
}

impl From<IoError> for UpgradeError {
    fn from(e: IoError) -> Self {
        UpgradeError::Io(e)
    }
}
