#![cfg(feature = "sled")]
#[macro_use]
mod common;

use netabase_relations::databases::sled_store::SledStore;

backend_scenarios!(SledStore::temporary().unwrap());
