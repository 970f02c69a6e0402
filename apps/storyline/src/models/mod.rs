pub mod about;
pub mod language;
pub mod post;
pub mod reading;
pub mod session;
pub mod tag;
pub mod user;

pub use about::AboutContent;
pub use language::Language;
pub use post::{Post, PostStatus};
pub use reading::ReadingHistoryItem;
pub use session::{Session, SessionUser};
pub use tag::Tag;
pub use user::{ManagedUser, Role, UserRole};
