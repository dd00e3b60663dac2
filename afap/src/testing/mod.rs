mod temp;
pub use temp::*;

mod context;
pub use context::*;

mod mocks;
pub use mocks::*;

use rstest::fixture;

use crate::package::{PackageSnapshot, PackageState, EXECUTE_APP_FUNCTIONS};

pub const AGENT: &str = "com.example.agent";
pub const AGENT_SIBLING: &str = "com.example.agent.sibling";
pub const OTHER_AGENT: &str = "com.example.other_agent";
pub const TARGET: &str = "com.example.target";

pub const AGENT_APP_ID: i32 = 10001;
pub const TARGET_APP_ID: i32 = 10002;
pub const OTHER_AGENT_APP_ID: i32 = 10003;

/// Users 0 and 10 with:
///
/// * [AGENT]: agent and target, installed for both users
/// * [AGENT_SIBLING]: agent sharing [AGENT]'s app id, user 0 only
/// * [OTHER_AGENT]: agent, user 0 only
/// * [TARGET]: target, installed for both users
#[fixture]
pub fn device_packages() -> PackageSnapshot {
    PackageSnapshot::new()
        .with_user(0)
        .with_user(10)
        .with_package(
            PackageState::new(AGENT, AGENT_APP_ID)
                .installed_for(0)
                .installed_for(10)
                .with_permission(EXECUTE_APP_FUNCTIONS)
                .with_app_function_service(),
        )
        .with_package(
            PackageState::new(AGENT_SIBLING, AGENT_APP_ID)
                .installed_for(0)
                .with_permission(EXECUTE_APP_FUNCTIONS),
        )
        .with_package(
            PackageState::new(OTHER_AGENT, OTHER_AGENT_APP_ID)
                .installed_for(0)
                .with_permission(EXECUTE_APP_FUNCTIONS),
        )
        .with_package(
            PackageState::new(TARGET, TARGET_APP_ID)
                .installed_for(0)
                .installed_for(10)
                .with_app_function_service(),
        )
}
