//! LTM控制面交互：token认证客户端与成员拉取

pub mod client;
pub mod fetcher;

pub use client::LtmClient;
pub use fetcher::{MembershipFetcher, FETCH_FAILURE_THRESHOLD};
