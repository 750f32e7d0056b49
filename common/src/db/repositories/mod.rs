// Repository layer for database operations

pub mod endpoint;

pub use endpoint::EndpointRepository;
