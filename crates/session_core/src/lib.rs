//! Session and synchronization engine for the messaging service: an
//! authenticated request queue with token renewal, a push channel
//! multiplexer, and synchronized collections of contacts, rooms,
//! conversations and meetings, plus the messaging and conference calls
//! made against them.

pub mod channel_mux;
pub mod collection;
pub mod config;
pub mod contacts;
pub mod conversations;
pub mod error;
pub mod frame;
pub mod meetings;
pub mod messaging;
pub mod observer;
pub mod renewal;
pub mod request_queue;
pub mod rooms;
pub mod session;
pub mod transport;

pub use channel_mux::{ChannelHandler, ChannelMessage, ChannelMultiplexer, SubscriberKey, SubscriptionId};
pub use collection::{CollectionEvent, Entity, EntityHandle, FetchState, SynchronizedCollection};
pub use config::SessionConfig;
pub use contacts::Contact;
pub use conversations::Conversation;
pub use error::{ErrorKind, Result, SessionError};
pub use meetings::Meeting;
pub use messaging::ChatTarget;
pub use renewal::RenewalPhase;
pub use request_queue::{HttpRequest, RequestHandle, RequestId, RequestQueue, RetryPolicy};
pub use rooms::Room;
pub use session::{
    ConnectionState, Domain, EntityKind, LogLevel, LoginProvider, MissingLoginProvider,
    Registration, Session, SessionEvent,
};
pub use transport::{HttpTransport, RawResponse, ReqwestTransport, ServiceResponse};
