use std::sync::Arc;

use mockall::mock;
use rstest::fixture;

use crate::config::Config;
use crate::ids::UserId;
use crate::service::CallerIdentity;
use crate::state::UserState;

#[fixture]
pub fn mock_context() -> MockContext {
    MockContext::new()
}

mock! {
    pub Context {}

    impl crate::Context for Context {
        fn maybe_get_env(&self, key: &str) -> Option<String>;
        fn get_config<'a>(&'a self) -> crate::Result<Option<&'a Config>>;
    }
}

mock! {
    pub PermissionEnforcer {}

    impl crate::service::PermissionEnforcer for PermissionEnforcer {
        fn enforce_calling_or_self_cross_user_permission(
            &self,
            caller: &CallerIdentity,
            user_id: UserId,
            message: &str,
        ) -> crate::Result<()>;

        fn enforce_calling_or_self_any_permission(
            &self,
            caller: &CallerIdentity,
            permissions: &[&'static str],
            message: &str,
        ) -> crate::Result<()>;
    }
}

mock! {
    pub UserOracle {}

    impl crate::service::UserOracle for UserOracle {
        fn user_exists(&self, user_id: UserId) -> bool;
    }
}

mock! {
    pub StateSink {}

    impl crate::state::StateSink for StateSink {
        fn write_user(&self, user_id: UserId, user_state: Arc<UserState>);
        fn remove_user(&self, user_id: UserId);
        fn flush(&self);
    }
}
