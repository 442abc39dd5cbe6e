pub mod data {
    pub(crate) mod datasources {
        pub(crate) mod app_store_server_api_datasource;
        pub(crate) mod google_play_developer_api_datasource;
        pub(crate) mod ledger_journal_datasource;
        pub(crate) mod utils;
    }
    pub(crate) mod models {
        pub(crate) mod app_store_server_api {
            pub(crate) mod common;
            pub(crate) mod jws_transaction_decoded_payload_model;
            pub(crate) mod transaction_info_response_model;
        }
        pub(crate) mod google_play_developer_api {
            pub(crate) mod product_purchase_model;
            pub(crate) mod subscription_purchase_v2_model;
        }
        pub(crate) mod ledger {
            pub(crate) mod entitlement_record_model;
        }
        pub(crate) mod native_updates {
            pub(crate) mod app_store_transaction_model;
            pub(crate) mod google_play_purchase_model;
        }
    }
    pub mod repositories {
        pub mod app_store_adapter;
        pub mod entitlement_ledger_impl;
        pub mod google_play_adapter;
        pub(crate) mod receipt_validator_impl;
    }
}

pub mod domain {
    pub mod entities {
        pub mod entitlement_record;
        pub mod product_catalog;
        pub mod purchase_event;
        pub mod reconciliation_notification;
        pub mod validation_result;
    }
    pub mod repositories {
        pub mod entitlement_ledger;
        pub mod receipt_validator;
        pub mod store_adapter;
    }
}

pub mod reconciliation {
    pub mod engine;
    pub mod retry_policy;
}

pub mod config;
pub mod errors;
pub mod secrets;
pub mod util;
