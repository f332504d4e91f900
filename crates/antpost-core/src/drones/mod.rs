pub mod async_http;
pub mod http;
pub mod parser;

pub use async_http::{AsyncHttp, AsyncHttpDrone, AsyncHttpRequest, AsyncHttpSession, AsyncOperator};
pub use http::{HttpDrone, HttpReq, NextHttp};
pub use parser::{AsyncHttpResponse, Parsed, ResponseParser};
