mod net;
pub use self::net::*;

mod peer;
pub use self::peer::*;
