/// The `type` of secrets holding a TLS certificate and key.
pub const SECRET_TYPE: &str = "kubernetes.io/tls";

/// Field selector matching only TLS secrets.
pub const SECRET_FIELD_SELECTOR: &str = "type=kubernetes.io/tls";

pub const CERT_KEY: &str = "tls.crt";

pub const PRIVATE_KEY_KEY: &str = "tls.key";
