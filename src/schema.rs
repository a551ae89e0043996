//! Handwritten Diesel schema declarations matching `migrations/`.
//!
//! `nodes` lives in the primary store; `readings` is the table every node's
//! log partition carries in its own database.

diesel::table! {
    nodes (doc_id) {
        doc_id -> Text,
        id -> Text,
        name -> Text,
        #[sql_name = "type"]
        node_type -> Text,
        frequency -> BigInt,
        online -> Bool,
        temperature -> Nullable<Double>,
        humidity -> Nullable<Double>,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    readings (doc_id) {
        doc_id -> Text,
        temperature -> Nullable<Double>,
        humidity -> Nullable<Double>,
        created_at -> BigInt,
    }
}
