//! Database schema
//!
//! `INIT` creates revision 1. Each entry of `MIGRATIONS` takes the schema
//! from revision `k` to `k + 1`, so the compiled revision is
//! `1 + MIGRATIONS.len()`.

pub struct Migration {
    pub description: &'static str,
    pub sql: &'static str,
}

pub const INIT: &str = r#"
    CREATE SCHEMA IF NOT EXISTS ew;
    CREATE SCHEMA IF NOT EXISTS core;
    CREATE SCHEMA IF NOT EXISTS adr;
    CREATE SCHEMA IF NOT EXISTS blk;
    CREATE SCHEMA IF NOT EXISTS mtr;
    CREATE SCHEMA IF NOT EXISTS cex;

    -- Engine metadata
    CREATE TABLE ew.revision (
        version INTEGER NOT NULL
    );
    CREATE TABLE ew.status (
        constraints_set BOOLEAN NOT NULL
    );
    CREATE TABLE ew.repairs (
        started BIGINT NOT NULL,
        from_height INTEGER NOT NULL,
        last_height INTEGER NOT NULL,
        next_height INTEGER NOT NULL
    );

    -- Ledger
    CREATE TABLE core.headers (
        height INTEGER NOT NULL,
        id VARCHAR(64) NOT NULL,
        parent_id VARCHAR(64) NOT NULL,
        timestamp BIGINT NOT NULL,
        difficulty BIGINT NOT NULL
    );
    CREATE TABLE core.transactions (
        id VARCHAR(64) NOT NULL,
        header_id VARCHAR(64) NOT NULL,
        height INTEGER NOT NULL,
        index INTEGER NOT NULL
    );
    CREATE TABLE core.outputs (
        box_id VARCHAR(64) NOT NULL,
        tx_id VARCHAR(64) NOT NULL,
        header_id VARCHAR(64) NOT NULL,
        creation_height INTEGER NOT NULL,
        address VARCHAR NOT NULL,
        index INTEGER NOT NULL,
        value BIGINT NOT NULL,
        size INTEGER NOT NULL
    );
    CREATE TABLE core.inputs (
        box_id VARCHAR(64) NOT NULL,
        tx_id VARCHAR(64) NOT NULL,
        header_id VARCHAR(64) NOT NULL,
        index INTEGER NOT NULL
    );
    CREATE TABLE core.data_inputs (
        box_id VARCHAR(64) NOT NULL,
        tx_id VARCHAR(64) NOT NULL,
        header_id VARCHAR(64) NOT NULL,
        index INTEGER NOT NULL
    );
    CREATE TABLE core.box_registers (
        id SMALLINT NOT NULL,
        box_id VARCHAR(64) NOT NULL,
        value_type VARCHAR NOT NULL,
        serialized_value VARCHAR NOT NULL,
        rendered_value VARCHAR NOT NULL
    );
    CREATE TABLE core.tokens (
        id VARCHAR(64) NOT NULL,
        box_id VARCHAR(64) NOT NULL,
        emission_amount BIGINT NOT NULL,
        name VARCHAR,
        description VARCHAR,
        decimals INTEGER
    );
    CREATE TABLE core.box_assets (
        box_id VARCHAR(64) NOT NULL,
        token_id VARCHAR(64) NOT NULL,
        amount BIGINT NOT NULL
    );
    CREATE TABLE core.unspent (
        box_id VARCHAR(64) NOT NULL
    );

    CREATE INDEX core_transactions_header_id_idx ON core.transactions(header_id);
    CREATE INDEX core_outputs_header_id_idx ON core.outputs(header_id);
    CREATE INDEX core_outputs_box_id_idx ON core.outputs(box_id);
    CREATE INDEX core_box_assets_box_id_idx ON core.box_assets(box_id);
    CREATE INDEX core_inputs_header_id_idx ON core.inputs(header_id);
    CREATE INDEX core_data_inputs_header_id_idx ON core.data_inputs(header_id);

    -- Balances
    CREATE TABLE adr.erg (
        address VARCHAR NOT NULL,
        value BIGINT NOT NULL,
        mean_age_timestamp BIGINT NOT NULL
    );
    CREATE TABLE adr.erg_diffs (
        address VARCHAR NOT NULL,
        height INTEGER NOT NULL,
        tx_id VARCHAR(64) NOT NULL,
        value BIGINT NOT NULL
    );
    CREATE TABLE adr.tokens (
        address VARCHAR NOT NULL,
        token_id VARCHAR(64) NOT NULL,
        value BIGINT NOT NULL
    );
    CREATE TABLE adr.tokens_diffs (
        address VARCHAR NOT NULL,
        token_id VARCHAR(64) NOT NULL,
        height INTEGER NOT NULL,
        tx_id VARCHAR(64) NOT NULL,
        value BIGINT NOT NULL
    );

    CREATE INDEX adr_erg_diffs_height_idx ON adr.erg_diffs(height);
    CREATE INDEX adr_erg_diffs_address_idx ON adr.erg_diffs(address);
    CREATE INDEX adr_tokens_diffs_height_idx ON adr.tokens_diffs(height);

    -- Block stats
    CREATE TABLE blk.stats (
        height INTEGER NOT NULL,
        circulating_supply BIGINT NOT NULL,
        emission BIGINT NOT NULL,
        reward BIGINT NOT NULL,
        tx_fees BIGINT NOT NULL,
        tx_count BIGINT NOT NULL,
        volume BIGINT NOT NULL
    );

    -- Metrics
    CREATE TABLE mtr.utxos (
        height INTEGER NOT NULL,
        value BIGINT NOT NULL
    );

    CREATE TABLE mtr.address_counts_by_balance_p2pks (
        height INTEGER NOT NULL,
        total BIGINT NOT NULL,
        ge_0p001 BIGINT NOT NULL,
        ge_0p01 BIGINT NOT NULL,
        ge_0p1 BIGINT NOT NULL,
        ge_1 BIGINT NOT NULL,
        ge_10 BIGINT NOT NULL,
        ge_100 BIGINT NOT NULL,
        ge_1k BIGINT NOT NULL,
        ge_10k BIGINT NOT NULL,
        ge_100k BIGINT NOT NULL,
        ge_1m BIGINT NOT NULL
    );
    CREATE TABLE mtr.address_counts_by_balance_contracts AS
        SELECT * FROM mtr.address_counts_by_balance_p2pks LIMIT 0;
    CREATE TABLE mtr.address_counts_by_balance_miners AS
        SELECT * FROM mtr.address_counts_by_balance_p2pks LIMIT 0;

    CREATE TABLE mtr.supply_on_top_addresses_p2pks (
        height INTEGER NOT NULL,
        top_1_prc BIGINT NOT NULL,
        top_1k BIGINT NOT NULL,
        top_100 BIGINT NOT NULL,
        top_10 BIGINT NOT NULL
    );
    CREATE TABLE mtr.supply_on_top_addresses_contracts AS
        SELECT * FROM mtr.supply_on_top_addresses_p2pks LIMIT 0;
    CREATE TABLE mtr.supply_on_top_addresses_miners AS
        SELECT * FROM mtr.supply_on_top_addresses_p2pks LIMIT 0;

    CREATE TABLE mtr.supply_composition (
        height INTEGER NOT NULL,
        p2pks BIGINT NOT NULL,
        cex_main BIGINT NOT NULL,
        cex_deposits BIGINT NOT NULL,
        contracts BIGINT NOT NULL,
        miners BIGINT NOT NULL,
        treasury BIGINT NOT NULL
    );

    CREATE TABLE mtr.supply_age_timestamps (
        height INTEGER NOT NULL,
        overall BIGINT NOT NULL,
        p2pks BIGINT NOT NULL,
        cexs BIGINT NOT NULL,
        contracts BIGINT NOT NULL,
        miners BIGINT NOT NULL
    );
    CREATE TABLE mtr.supply_age_days (
        height INTEGER NOT NULL,
        overall DOUBLE NOT NULL,
        p2pks DOUBLE NOT NULL,
        cexs DOUBLE NOT NULL,
        contracts DOUBLE NOT NULL,
        miners DOUBLE NOT NULL
    );

    CREATE TABLE mtr.transactions (
        height INTEGER NOT NULL,
        daily_1d BIGINT NOT NULL,
        daily_7d DOUBLE NOT NULL,
        daily_28d DOUBLE NOT NULL
    );
    CREATE TABLE mtr.volume (
        height INTEGER NOT NULL,
        daily_1d BIGINT NOT NULL,
        daily_7d DOUBLE NOT NULL,
        daily_28d DOUBLE NOT NULL
    );

    CREATE TABLE mtr.timestamps_daily (
        timestamp BIGINT NOT NULL,
        height INTEGER NOT NULL
    );

    -- One summary table per series
    CREATE TABLE mtr.utxos_summary (
        label VARCHAR NOT NULL,
        current DOUBLE NOT NULL,
        diff_1d DOUBLE NOT NULL,
        diff_1w DOUBLE NOT NULL,
        diff_4w DOUBLE NOT NULL,
        diff_6m DOUBLE NOT NULL,
        diff_1y DOUBLE NOT NULL
    );
    CREATE TABLE mtr.address_counts_by_balance_p2pks_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;
    CREATE TABLE mtr.address_counts_by_balance_contracts_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;
    CREATE TABLE mtr.address_counts_by_balance_miners_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;
    CREATE TABLE mtr.supply_on_top_addresses_p2pks_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;
    CREATE TABLE mtr.supply_on_top_addresses_contracts_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;
    CREATE TABLE mtr.supply_on_top_addresses_miners_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;
    CREATE TABLE mtr.supply_composition_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;
    CREATE TABLE mtr.supply_age_days_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;
    CREATE TABLE mtr.transactions_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;
    CREATE TABLE mtr.volume_summary AS SELECT * FROM mtr.utxos_summary LIMIT 0;

    -- Exchanges
    CREATE TABLE cex.cexs (
        id INTEGER NOT NULL,
        name VARCHAR NOT NULL
    );
    CREATE TABLE cex.addresses (
        address VARCHAR NOT NULL,
        cex_id INTEGER NOT NULL,
        type VARCHAR NOT NULL,
        spot_height INTEGER
    );
    CREATE TABLE cex.addresses_conflicts (
        address VARCHAR NOT NULL,
        first_cex_id INTEGER NOT NULL,
        type VARCHAR NOT NULL,
        spot_height INTEGER,
        conflict_spot_height INTEGER NOT NULL
    );
    CREATE TABLE cex.block_processing_log (
        header_id VARCHAR(64) NOT NULL,
        height INTEGER NOT NULL,
        invalidation_height INTEGER,
        status VARCHAR NOT NULL
    );
    CREATE TABLE cex.supply (
        height INTEGER NOT NULL,
        cex_id INTEGER NOT NULL,
        main BIGINT NOT NULL,
        deposit BIGINT NOT NULL
    );
"#;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        description: "erg/usd quotes",
        sql: r#"
        CREATE TABLE mtr.ergusd (
            height INTEGER NOT NULL,
            value DOUBLE NOT NULL
        );
        CREATE TABLE mtr.ergusd_daily (
            timestamp BIGINT NOT NULL,
            value DOUBLE NOT NULL
        );
        CREATE TABLE mtr.ergusd_provisional (
            height INTEGER NOT NULL
        );
        "#,
    },
    Migration {
        description: "hourly timestamps",
        sql: r#"
        CREATE TABLE mtr.timestamps_hourly (
            timestamp BIGINT NOT NULL,
            height INTEGER NOT NULL
        );
        INSERT INTO mtr.timestamps_hourly (timestamp, height)
        SELECT timestamp - timestamp % 3600000 AS t, min(height)
        FROM core.headers
        GROUP BY 1
        ORDER BY 1;
        "#,
    },
    Migration {
        description: "token standard",
        sql: r#"
        ALTER TABLE core.tokens ADD COLUMN standard VARCHAR;
        UPDATE core.tokens SET standard = 'EIP-004'
        WHERE name IS NOT NULL AND description IS NOT NULL AND decimals IS NOT NULL;
        "#,
    },
    Migration {
        description: "incremental supply metrics",
        sql: r#"
        CREATE TABLE mtr.supply_age_sums (
            height INTEGER NOT NULL,
            overall_value HUGEINT NOT NULL,
            overall_weight HUGEINT NOT NULL,
            p2pks_value HUGEINT NOT NULL,
            p2pks_weight HUGEINT NOT NULL,
            contracts_value HUGEINT NOT NULL,
            contracts_weight HUGEINT NOT NULL,
            miners_value HUGEINT NOT NULL,
            miners_weight HUGEINT NOT NULL
        );
        CREATE TABLE mtr.supply_on_top_addresses_cutoffs (
            height INTEGER NOT NULL,
            p2pks BIGINT NOT NULL,
            contracts BIGINT NOT NULL,
            miners BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS core_outputs_box_id_idx ON core.outputs(box_id);
        CREATE INDEX IF NOT EXISTS core_box_assets_box_id_idx ON core.box_assets(box_id);
        "#,
    },
];

/// Revision the running binary expects
pub const CURRENT_REVISION: i32 = 1 + MIGRATIONS.len() as i32;

/// Unique indexes created once bootstrap has completed. Until then the
/// tables are append-only and not checked for duplicates.
pub const CONSTRAINTS: &str = r#"
    CREATE UNIQUE INDEX core_headers_height_key ON core.headers(height);
    CREATE UNIQUE INDEX core_headers_id_key ON core.headers(id);
    CREATE UNIQUE INDEX core_transactions_id_key ON core.transactions(id);
    CREATE UNIQUE INDEX core_outputs_box_id_key ON core.outputs(box_id);
    CREATE UNIQUE INDEX core_inputs_box_id_key ON core.inputs(box_id);
    CREATE UNIQUE INDEX core_tokens_id_key ON core.tokens(id);
    CREATE UNIQUE INDEX core_box_registers_key ON core.box_registers(box_id, id);
    CREATE UNIQUE INDEX core_unspent_box_id_key ON core.unspent(box_id);

    CREATE UNIQUE INDEX adr_erg_address_key ON adr.erg(address);
    CREATE UNIQUE INDEX adr_tokens_key ON adr.tokens(address, token_id);

    CREATE UNIQUE INDEX blk_stats_height_key ON blk.stats(height);

    CREATE UNIQUE INDEX mtr_utxos_height_key ON mtr.utxos(height);
    CREATE UNIQUE INDEX mtr_address_counts_by_balance_p2pks_height_key ON mtr.address_counts_by_balance_p2pks(height);
    CREATE UNIQUE INDEX mtr_address_counts_by_balance_contracts_height_key ON mtr.address_counts_by_balance_contracts(height);
    CREATE UNIQUE INDEX mtr_address_counts_by_balance_miners_height_key ON mtr.address_counts_by_balance_miners(height);
    CREATE UNIQUE INDEX mtr_supply_on_top_addresses_p2pks_height_key ON mtr.supply_on_top_addresses_p2pks(height);
    CREATE UNIQUE INDEX mtr_supply_on_top_addresses_contracts_height_key ON mtr.supply_on_top_addresses_contracts(height);
    CREATE UNIQUE INDEX mtr_supply_on_top_addresses_miners_height_key ON mtr.supply_on_top_addresses_miners(height);
    CREATE UNIQUE INDEX mtr_timestamps_daily_key ON mtr.timestamps_daily(timestamp);
    CREATE UNIQUE INDEX mtr_supply_composition_height_key ON mtr.supply_composition(height);
    CREATE UNIQUE INDEX mtr_supply_age_timestamps_height_key ON mtr.supply_age_timestamps(height);
    CREATE UNIQUE INDEX mtr_supply_age_days_height_key ON mtr.supply_age_days(height);
    CREATE UNIQUE INDEX mtr_supply_age_sums_height_key ON mtr.supply_age_sums(height);
    CREATE UNIQUE INDEX mtr_supply_on_top_addresses_cutoffs_height_key ON mtr.supply_on_top_addresses_cutoffs(height);
    CREATE UNIQUE INDEX mtr_transactions_height_key ON mtr.transactions(height);
    CREATE UNIQUE INDEX mtr_volume_height_key ON mtr.volume(height);

    CREATE UNIQUE INDEX cex_addresses_address_key ON cex.addresses(address);
    CREATE UNIQUE INDEX cex_addresses_conflicts_address_key ON cex.addresses_conflicts(address);
    CREATE UNIQUE INDEX cex_block_processing_log_header_id_key ON cex.block_processing_log(header_id);
    CREATE UNIQUE INDEX cex_supply_key ON cex.supply(height, cex_id);
"#;
