pub mod invitation;
pub mod review;
pub mod team;
pub mod user;
