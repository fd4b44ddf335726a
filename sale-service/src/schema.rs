diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        stock -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    holds (id) {
        id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        expires_at -> Timestamptz,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        status -> Varchar,
        hold_id -> Nullable<Uuid>,
        idempotency_key -> Varchar,
        payment_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    payment_webhooks (id) {
        id -> Uuid,
        order_id -> Uuid,
        status -> Varchar,
        idempotency_key -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(holds -> products (product_id));
diesel::joinable!(orders -> products (product_id));
diesel::joinable!(orders -> holds (hold_id));
diesel::joinable!(payment_webhooks -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    products,
    holds,
    orders,
    payment_webhooks,
);
