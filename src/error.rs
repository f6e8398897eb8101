pub type Result<T> = std::result::Result<T, failure::Error>;

#[derive(Debug, Fail)]
pub enum PipelineError {
    #[fail(display = "Invalid configuration: {}", _0)]
    Config(String),
    #[fail(display = "Malformed message body: {}", _0)]
    MalformedBody(String),
    #[fail(display = "Delivery token {} is no longer valid for queue {}", token, queue)]
    StaleDeliveryToken { queue: String, token: String },
    #[fail(display = "{} responded with status {}", endpoint, status)]
    Status { endpoint: String, status: u16 },
}
