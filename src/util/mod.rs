pub mod api_util;
pub mod auto_fetch;
pub mod cache;
pub mod cipher_util;
pub mod economy;
pub mod stat;
