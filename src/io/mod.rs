mod http_client;
mod render;

pub use http_client::{HttpClient, ReqwestHttpClient, DEFAULT_USER_AGENT};
pub use render::{HttpPageContext, RenderingContext, DEFAULT_PAGE_TIMEOUT};
