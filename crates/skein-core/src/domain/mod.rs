//! Domain model (envelope, strand policy, errors).

pub mod errors;
pub mod message;
pub mod strand;

pub use self::errors::{BrokerError, ErrorKind, StorageError, TransportError};
pub use self::message::Msg;
pub use self::strand::{InvalidStrandReason, StrandConf, validate_strand_id};
