use rusqlite::Connection;

pub(super) fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS manuscripts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            genre TEXT NOT NULL,
            style_guide TEXT,
            word_count INTEGER NOT NULL,
            file_name TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            state TEXT NOT NULL,
            flagged_for_review INTEGER NOT NULL DEFAULT 0,
            duplicate_of TEXT,
            latest_report_id TEXT,
            uploaded_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_manuscripts_user_uploaded
            ON manuscripts(user_id, uploaded_at DESC, id DESC);
        CREATE INDEX IF NOT EXISTS idx_manuscripts_user_hash
            ON manuscripts(user_id, content_hash);

        CREATE TABLE IF NOT EXISTS jobs (
            report_id TEXT PRIMARY KEY,
            manuscript_id TEXT NOT NULL REFERENCES manuscripts(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            pipeline TEXT NOT NULL,
            genre TEXT NOT NULL,
            style_guide TEXT,
            kinds TEXT,
            attempt INTEGER NOT NULL DEFAULT 0,
            parent_report_id TEXT,
            prior_state TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_one_active
            ON jobs(manuscript_id) WHERE active = 1;

        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            plan_type TEXT NOT NULL,
            status TEXT NOT NULL,
            current_period_start TEXT NOT NULL,
            current_period_end TEXT NOT NULL,
            stripe_customer_id TEXT,
            stripe_subscription_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payment_transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            subscription_id TEXT,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL,
            stripe_payment_intent_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS usage_tracking (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            subscription_id TEXT,
            plan_type TEXT NOT NULL,
            manuscript_id TEXT NOT NULL,
            report_id TEXT NOT NULL UNIQUE,
            analysis_type TEXT NOT NULL,
            credits_used INTEGER NOT NULL DEFAULT 1,
            billing_period_start TEXT NOT NULL,
            billing_period_end TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_usage_user_period
            ON usage_tracking(user_id, billing_period_start);

        CREATE TABLE IF NOT EXISTS manuscript_artifacts (
            manuscript_id TEXT NOT NULL REFERENCES manuscripts(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            version INTEGER NOT NULL,
            report_id TEXT,
            storage_key TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            model TEXT NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (manuscript_id, kind)
        );

        CREATE TABLE IF NOT EXISTS queue_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            queue TEXT NOT NULL,
            report_id TEXT NOT NULL,
            body TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'ready',
            attempts INTEGER NOT NULL DEFAULT 0,
            visible_at TEXT NOT NULL,
            last_error TEXT,
            enqueued_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_queue_messages_ready
            ON queue_messages(queue, state, visible_at, id);

        CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_kv_entries_expires ON kv_entries(expires_at);

        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            manuscript_id TEXT,
            report_id TEXT,
            user_id TEXT,
            data TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_audit_log_event_type ON audit_log(event_type);
        CREATE INDEX IF NOT EXISTS idx_audit_log_manuscript_id ON audit_log(manuscript_id);
        CREATE INDEX IF NOT EXISTS idx_audit_log_user_id ON audit_log(user_id);
        "#,
    )
}
