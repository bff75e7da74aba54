use guid_create::GUID;

pub type TransactionId = String;

pub fn gen_tid() -> TransactionId {
    GUID::rand().to_string().to_lowercase().replace('-', "")
}

lazy_static::lazy_static! {
  pub static ref STARTUP_TID: TransactionId = "Startup".to_string();
  pub static ref CLEAN_TID: TransactionId = "Clean".to_string();
  pub static ref POOL_RECONCILE_TID: TransactionId = "PoolReconcile".to_string();
  pub static ref TEST_TID: TransactionId = "TestTest".to_string();
}
