use crate::error::{EtlError, Result};
use crate::normalize::{OperatorRecord, StatementRecord};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::info;

/// The relational store. The pipeline orchestrator owns the connection
/// lifecycle; everything else receives `&mut Store`.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Creates both relations if absent. Safe to re-run; called before
    /// any load.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS operators (
                registro_ans TEXT PRIMARY KEY,
                cnpj TEXT,
                razao_social TEXT,
                nome_fantasia TEXT,
                modalidade TEXT,
                data_registro TEXT
            );
            CREATE TABLE IF NOT EXISTS statements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data DATE NOT NULL,
                registro_ans TEXT NOT NULL,
                codigo_conta TEXT NOT NULL,
                descricao TEXT NOT NULL,
                valor DECIMAL(15,2) NOT NULL,
                ano INTEGER NOT NULL,
                trimestre TEXT NOT NULL,
                UNIQUE(data, registro_ans, codigo_conta),
                FOREIGN KEY (registro_ans) REFERENCES operators(registro_ans)
            );
            "#,
        )?;
        info!("Store schema ensured");
        Ok(())
    }

    /// Replaces the operator relation with `records` in one transaction
    /// and returns the count loaded.
    pub fn load_operators(&mut self, records: &[OperatorRecord]) -> Result<usize> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| EtlError::Load(e.to_string()))?;
        let loaded = (|| -> rusqlite::Result<usize> {
            tx.execute("DELETE FROM operators", [])?;
            let mut stmt = tx.prepare(
                "INSERT INTO operators
                 (registro_ans, cnpj, razao_social, nome_fantasia, modalidade, data_registro)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.registro_ans,
                    r.cnpj,
                    r.razao_social,
                    r.nome_fantasia,
                    r.modalidade,
                    r.data_registro.map(|d| d.to_string()),
                ])?;
            }
            Ok(records.len())
        })()
        .map_err(|e| EtlError::Load(e.to_string()))?;
        tx.commit().map_err(|e| EtlError::Load(e.to_string()))?;
        info!("Loaded {} operator records", loaded);
        Ok(loaded)
    }

    /// Degraded fallback: leave the operator relation present but empty.
    pub fn clear_operators(&mut self) -> Result<()> {
        self.conn
            .execute("DELETE FROM operators", [])
            .map_err(|e| EtlError::Load(e.to_string()))?;
        Ok(())
    }

    /// Appends statement records in transactions of at most `batch_size`
    /// rows and returns the total appended. A constraint violation fails
    /// the current batch; previously committed batches stay in place.
    pub fn append_statements(
        &mut self,
        records: &[StatementRecord],
        batch_size: usize,
    ) -> Result<usize> {
        let batch_size = batch_size.max(1);
        let mut appended = 0usize;
        for chunk in records.chunks(batch_size) {
            let tx = self
                .conn
                .transaction()
                .map_err(|e| EtlError::Load(e.to_string()))?;
            (|| -> rusqlite::Result<()> {
                let mut stmt = tx.prepare(
                    "INSERT INTO statements
                     (data, registro_ans, codigo_conta, descricao, valor, ano, trimestre)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for r in chunk {
                    stmt.execute(params![
                        r.data.to_string(),
                        r.registro_ans,
                        r.codigo_conta,
                        r.descricao,
                        r.valor.to_string(),
                        r.ano,
                        r.trimestre,
                    ])?;
                }
                Ok(())
            })()
            .map_err(|e| EtlError::Load(e.to_string()))?;
            tx.commit().map_err(|e| EtlError::Load(e.to_string()))?;
            appended += chunk.len();
        }
        Ok(appended)
    }

    pub fn operator_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM operators", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn statement_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM statements", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Closes the connection, surfacing any flush error.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| EtlError::Load(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn operator(registro: &str, razao: &str) -> OperatorRecord {
        OperatorRecord {
            registro_ans: registro.to_string(),
            cnpj: None,
            razao_social: Some(razao.to_string()),
            nome_fantasia: None,
            modalidade: None,
            data_registro: None,
        }
    }

    fn statement(registro: &str, conta: &str, valor: &str) -> StatementRecord {
        StatementRecord {
            data: NaiveDate::from_ymd_opt(2023, 3, 31).unwrap(),
            registro_ans: registro.to_string(),
            codigo_conta: conta.to_string(),
            descricao: "Receita".to_string(),
            valor: Decimal::from_str(valor).unwrap(),
            ano: 2023,
            trimestre: "1T".to_string(),
        }
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();
        let tables: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('operators', 'statements')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn load_operators_replaces_previous_contents() {
        let mut store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();

        let loaded = store
            .load_operators(&[operator("1", "ACME"), operator("2", "BETA")])
            .unwrap();
        assert_eq!(loaded, 2);

        let loaded = store.load_operators(&[operator("3", "GAMA")]).unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(store.operator_count().unwrap(), 1);

        let razao: String = store
            .conn()
            .query_row(
                "SELECT razao_social FROM operators WHERE registro_ans = '3'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(razao, "GAMA");
    }

    #[test]
    fn append_statements_batches_everything() {
        let mut store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();

        let records: Vec<StatementRecord> = (0..2500)
            .map(|i| statement(&format!("{i}"), "311", "10.00"))
            .collect();
        let appended = store.append_statements(&records, 1000).unwrap();
        assert_eq!(appended, 2500);
        assert_eq!(store.statement_count().unwrap(), 2500);
    }

    #[test]
    fn duplicate_composite_key_fails_the_batch() {
        let mut store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();

        store
            .append_statements(&[statement("1", "311", "10.00")], 1000)
            .unwrap();
        let err = store
            .append_statements(&[statement("1", "311", "99.99")], 1000)
            .unwrap_err();
        assert!(matches!(err, EtlError::Load(_)));
        // The original row is untouched
        assert_eq!(store.statement_count().unwrap(), 1);
    }

    #[test]
    fn monetary_values_survive_the_round_trip() {
        let mut store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
            .append_statements(&[statement("1", "311", "1000.00")], 1000)
            .unwrap();

        let valor: f64 = store
            .conn()
            .query_row("SELECT valor FROM statements", [], |row| row.get(0))
            .unwrap();
        assert!((valor - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_operators_leaves_an_empty_relation() {
        let mut store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store.load_operators(&[operator("1", "ACME")]).unwrap();
        store.clear_operators().unwrap();
        assert_eq!(store.operator_count().unwrap(), 0);
    }
}
