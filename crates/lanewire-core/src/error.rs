use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io,
    net::SocketAddr,
    result,
};

/// Wrapped result type for lanewire operations.
pub type Result<T> = result::Result<T, ErrorKind>;

/// Enum with all possible lanewire errors.
#[derive(Debug)]
pub enum ErrorKind {
    /// Error in decoding the packet.
    DecodingError(DecodingErrorKind),
    /// Payload does not fit into a single datagram on a channel that cannot fragment.
    PacketTooLarge {
        /// Size the caller asked to send (header included).
        size: usize,
        /// Largest size the connection currently allows.
        max: usize,
    },
    /// Fragmenting the payload would need more fragments than the index range allows.
    TooManyFragments(usize),
    /// A connection already holds the given number of incomplete fragmented messages.
    TooManyAssemblies(usize),
    /// No live connection exists for the given endpoint.
    UnknownConnection(SocketAddr),
    /// A connection to the given endpoint already exists.
    AlreadyConnected(SocketAddr),
    /// The manager already holds its maximum number of connections.
    ConnectionLimitReached,
    /// Wrapper around a std io::Error.
    IOError(io::Error),
}

impl Display for ErrorKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DecodingError(e) => {
                write!(fmt, "Something went wrong with parsing the packet. Reason: {:?}.", e)
            }
            ErrorKind::PacketTooLarge { size, max } => write!(
                fmt,
                "The packet of {} bytes exceeds the maximum of {} bytes for its channel.",
                size, max
            ),
            ErrorKind::TooManyFragments(count) => {
                write!(fmt, "The payload would need {} fragments, more than a message can carry.", count)
            }
            ErrorKind::TooManyAssemblies(count) => {
                write!(fmt, "Already reassembling {} fragmented messages, dropping another.", count)
            }
            ErrorKind::UnknownConnection(addr) => {
                write!(fmt, "There is no connection to {}.", addr)
            }
            ErrorKind::AlreadyConnected(addr) => {
                write!(fmt, "A connection to {} already exists.", addr)
            }
            ErrorKind::ConnectionLimitReached => {
                write!(fmt, "The maximum number of connections has been reached.")
            }
            ErrorKind::IOError(e) => write!(fmt, "An IO Error occurred. Reason: {:?}.", e),
        }
    }
}

impl Error for ErrorKind {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ErrorKind::IOError(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors that could occur while parsing a datagram.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DecodingErrorKind {
    /// The datagram was empty.
    EmptyPacket,
    /// The kind tag is outside the known enumeration.
    PacketKind,
    /// The datagram is shorter than the header of its kind or larger than any datagram.
    PacketSize,
    /// The fragmented flag is set on a kind that cannot be fragmented.
    FragmentedKind,
    /// A control payload (connect request, accept, disconnect, probe) is malformed.
    ControlPayload,
    /// The fragment header carries an impossible index or count.
    FragmentHeader,
    /// A merged datagram carries a truncated inner packet.
    MergedPayload,
}

impl From<io::Error> for ErrorKind {
    fn from(inner: io::Error) -> ErrorKind {
        ErrorKind::IOError(inner)
    }
}

impl From<DecodingErrorKind> for ErrorKind {
    fn from(inner: DecodingErrorKind) -> Self {
        ErrorKind::DecodingError(inner)
    }
}
