pub(crate) mod worker;
pub(crate) mod writeback;
