// onboard-api: async gateway to a single BIG-IP's management REST API

pub mod error;
pub mod gateway;
pub mod rest;
pub mod retry;
pub mod transport;

pub use error::Error;
pub use gateway::{
    BigIqLicenseRequest, BigIqRevokeRequest, BigIqTarget, DeviceGateway, DeviceGroupOptions, DeviceGroupType,
    DeviceInfo, JoinClusterRequest, RegKeyLicenseRequest, enabled,
};
pub use rest::RestGateway;
pub use retry::RetryPolicy;
pub use transport::{GatewayConfig, TlsMode, TransportConfig};
