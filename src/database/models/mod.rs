pub mod note;
pub mod user;

pub use note::SessionNote;
pub use user::UserRecord;
