pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod net;

#[cfg(test)]
pub mod test_util;
