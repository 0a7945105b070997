//! External service clients/adapters.

pub mod messaging;

pub use messaging::{
    MessagingCall, MessagingClient, MessagingError, MyAliceClient, RecordingMessagingClient,
};
