/// Peer connection state machine.
///
/// Tracks the lifecycle of a peer connection from the first connect request
/// to its terminal disconnected state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// Connect request sent, waiting for the accept
    #[default]
    Handshaking,

    /// Both sides have completed the handshake - connection is active
    Connected,

    /// Terminal state; the peer is removed from its manager
    Disconnected,
}

impl PeerState {
    /// Returns true if the connection is fully established
    pub fn is_established(&self) -> bool {
        matches!(self, PeerState::Connected)
    }

    /// Returns true if the peer is in the middle of the connection handshake
    pub fn is_connecting(&self) -> bool {
        matches!(self, PeerState::Handshaking)
    }

    /// Returns true if the peer reached its terminal state
    pub fn is_disconnected(&self) -> bool {
        matches!(self, PeerState::Disconnected)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The handshake ran out of connect attempts.
    ConnectionFailed,
    /// Nothing was heard from the remote within the disconnect timeout.
    Timeout,
    /// The socket failed while receiving.
    SocketReceiveError,
    /// The socket failed while sending to this peer.
    SocketSendError,
    /// The remote side sent a disconnect.
    RemoteConnectionClose,
    /// The local application asked for the disconnect.
    DisconnectPeerCalled,
}
