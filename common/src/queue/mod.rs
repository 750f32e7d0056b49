// Queue module: transports that carry scan jobs to the scan workers

pub mod nats;
pub mod sqs;
pub mod transport;

pub use nats::NatsTransport;
pub use sqs::SqsTransport;
pub use transport::QueueTransport;
