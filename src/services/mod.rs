/// Wiring of a joined match.
pub mod match_session;
/// Payload normalization for push messages and REST snapshots.
pub mod normalizer;
/// REST polling fallback while the push channel is down.
pub mod polling_service;
/// Optimistic add-point / undo writes.
pub mod scoring_service;
/// Socket seam and its WebSocket implementation.
pub mod socket;
/// STOMP session management over the socket seam.
pub mod transport_service;
