pub mod access_error;
pub mod canonical;
pub mod clock;
pub mod fingerprint;
pub mod logging;
pub mod password;

pub use access_error::AccessError;
pub use canonical::to_canonical_json;
pub use clock::{Clock, ManualClock, SystemClock};
pub use fingerprint::device_fingerprint;
pub use password::{
    hash_password, needs_rehash, verify_password, PasswordConfig, PasswordError,
    PasswordVerification,
};
