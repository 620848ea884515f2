//! 핸들러 모듈

pub mod call;
pub mod connection;
pub mod relay;
pub mod turn;

pub use call::*;
pub use connection::*;
pub use relay::*;
pub use turn::*;
