pub mod oidc;
pub mod placeholder;
pub mod request;
pub mod response;
