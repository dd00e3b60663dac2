//! Identifier helpers.
//!
//! User ids, app ids and uids are handed to us by the platform as plain
//! integers. The only structure we rely on is that a uid packs a user id and an
//! app id together so that persisted target uids can be reconciled against the
//! known users and app ids.

pub type UserId = i32;
pub type AppId = i32;
pub type Uid = i32;

/// Number of uids reserved for each user
pub const PER_USER_RANGE: i32 = 100_000;

/// The system user
pub const USER_SYSTEM: UserId = 0;

/// Largest user id whose uids still fit in a [Uid]
pub const MAX_USER_ID: UserId = Uid::MAX / PER_USER_RANGE - 1;

/// User ids outside this range can't be packed by [uid_of]
#[inline]
pub fn is_valid_user_id(user_id: UserId) -> bool {
    (USER_SYSTEM..=MAX_USER_ID).contains(&user_id)
}

#[inline]
pub fn is_valid_app_id(app_id: AppId) -> bool {
    (0..PER_USER_RANGE).contains(&app_id)
}

#[inline]
pub fn uid_of(user_id: UserId, app_id: AppId) -> Uid {
    user_id * PER_USER_RANGE + app_id % PER_USER_RANGE
}

#[inline]
pub fn user_id_of(uid: Uid) -> UserId {
    uid / PER_USER_RANGE
}

#[inline]
pub fn app_id_of(uid: Uid) -> AppId {
    uid % PER_USER_RANGE
}
