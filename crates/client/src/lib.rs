// huddle-client: client-resident presence and delivery synchronization.
//
// Owns one realtime channel per process, reconciles presence snapshots
// with incremental hints, tracks unseen-message counters, and keeps a
// durable visibility preference for the contact list. Credential checks
// and message storage are external collaborators reached through the
// traits in `api`.

pub mod api;
pub mod chat;
pub mod client;
pub mod presence;
pub mod session;
pub mod transport;
pub mod visibility;
