mod common;
mod conversations;
mod entries;
mod groups;
mod memberships;
mod tasks;
mod transfers;

pub use conversations::*;
pub use entries::*;
pub use groups::*;
pub use memberships::*;
pub use tasks::*;
pub use transfers::*;
