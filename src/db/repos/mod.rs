mod conversations;
pub mod cursor;
mod entries;
mod groups;
mod memberships;
mod tasks;
mod transfers;

pub use conversations::*;
pub use cursor::*;
pub use entries::*;
pub use groups::*;
pub use memberships::*;
pub use tasks::*;
pub use transfers::*;
