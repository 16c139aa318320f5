pub mod ms {
    pub const POLL_INTERVAL: u64 = 100;
    pub const FRAME_SETTLE: u64 = 500;
    pub const WAITING_TICK: u64 = 1000;
    pub const EVALUATE: u64 = 2000;
    pub const DEFAULT_DEBOUNCE: u64 = 500;
    pub const DEFAULT_MAX_TIMEOUT: u64 = 5000;
}

pub mod secs {
    pub const REQUEST: u64 = 60;
    pub const NAVIGATION: u64 = 30;
    pub const CLOSE: u64 = 5;
}

pub mod limits {
    /// Request URLs longer than this are shortened before logging.
    pub const LOGGED_URL_LEN: usize = 256;
}
