pub mod blocklist;
pub mod db;
pub mod keys;
pub mod scan;
