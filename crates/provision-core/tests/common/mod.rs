use provision::{InMemoryCloud, ProvisioningContext};

pub const ACCOUNT_ID: &str = "123456789012";
pub const REGION: &str = "eu-west-1";

pub fn cloud() -> InMemoryCloud {
    InMemoryCloud::new(ACCOUNT_ID, REGION)
}

pub fn context(parent_id: &str, environment: &str) -> ProvisioningContext {
    ProvisioningContext::new(parent_id, environment, ACCOUNT_ID, REGION).unwrap()
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}
