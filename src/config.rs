/// The endpoint the probe binary connects to. Nothing overrides it.
pub const DEFAULT_ENDPOINT: &str = "wss://ws.s0.b.hmny.io";
// testnet: "wss://ws.s0.t.hmny.io"

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn default_endpoint_is_secure_websocket() {
        let url = Url::parse(DEFAULT_ENDPOINT).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("ws.s0.b.hmny.io"));
    }
}
