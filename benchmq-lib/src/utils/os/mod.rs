mod unix;

pub use self::unix::{raise_nofile, rlim_t};
