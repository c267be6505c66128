mod http_transport;

pub use http_transport::{format_headers, join_url, HttpTransport, OutboundRequest};
