// End-to-end Bronze → Silver → Gold runs through the Lakehouse facade

use arrow::array::{Array, Float64Array, Int64Array, RecordBatch, StringArray};
use medallion::{CleanOptions, Lakehouse, LakehouseError};
use medallion_config::{FsConfig, RuntimeConfig, StorageBackend};
use medallion_core::{DimensionLookup, PipelineError, Predicate};
use medallion_table::{Operation, OptimizeStrategy, TableError, WriteMode};

const ORDERS_CSV: &str = "\
order_id,customer,status,amount,quantity,product_id
1,alice, NEW ,10.5,1,100
2,bob,shipped,20.0,2,200
1,alice,Shipped,10.5,1,100
3,carol,NEW,7.25,3,999
";

const PRODUCTS_JSON: &str = r#"[
  {"product_id": 100, "product_key": 1, "name": "widget"},
  {"product_id": 200, "product_key": 2, "name": "gadget"}
]"#;

fn lakehouse() -> Lakehouse {
    Lakehouse::new(&RuntimeConfig::in_memory()).expect("in-memory lakehouse")
}

fn strings(batch: &RecordBatch, name: &str) -> Vec<Option<String>> {
    batch
        .column_by_name(name)
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap()
        .iter()
        .map(|v| v.map(str::to_string))
        .collect()
}

fn int64s(batch: &RecordBatch, name: &str) -> Vec<i64> {
    batch
        .column_by_name(name)
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap()
        .values()
        .to_vec()
}

async fn seed(lakehouse: &Lakehouse) {
    lakehouse
        .upload_file("raw/orders.csv", ORDERS_CSV.as_bytes().to_vec())
        .await
        .unwrap();
    lakehouse
        .upload_file("raw/products.json", PRODUCTS_JSON.as_bytes().to_vec())
        .await
        .unwrap();
}

#[tokio::test]
async fn bronze_ingestion_tags_rows() {
    let lakehouse = lakehouse();
    seed(&lakehouse).await;

    let bronze = lakehouse
        .ingest_csv_to_bronze("raw/orders.csv", "bronze_orders")
        .await
        .unwrap();
    assert_eq!(bronze.num_rows(), 4);
    assert!(bronze.column_by_name("_ingested_at").is_some());
    assert_eq!(
        strings(&bronze, "_source_file")[0].as_deref(),
        Some("raw/orders.csv")
    );

    // Appending the same file again doubles the Bronze table.
    lakehouse
        .ingest_csv_to_bronze("raw/orders.csv", "bronze_orders")
        .await
        .unwrap();
    let table = lakehouse.read_table("bronze_orders", None).await.unwrap();
    assert_eq!(table.num_rows(), 8);

    let history = lakehouse.history("bronze_orders").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|m| m.mode == Some(WriteMode::Append)));
}

#[tokio::test]
async fn bronze_appends_match_columns_by_name() {
    let lakehouse = lakehouse();
    lakehouse
        .upload_file("raw/a.csv", b"id,name\n1,x\n".to_vec())
        .await
        .unwrap();
    lakehouse
        .upload_file("raw/b.csv", b"name,id\ny,2\n".to_vec())
        .await
        .unwrap();

    lakehouse.ingest_csv_to_bronze("raw/a.csv", "bronze").await.unwrap();
    lakehouse.ingest_csv_to_bronze("raw/b.csv", "bronze").await.unwrap();

    let table = lakehouse.read_table("bronze", None).await.unwrap();
    assert_eq!(table.num_rows(), 2);
    assert_eq!(table.schema().field(0).name(), "id");
    assert_eq!(table.schema().field(1).name(), "name");
    assert_eq!(int64s(&table, "id"), vec![1, 2]);
    assert_eq!(
        strings(&table, "name"),
        vec![Some("x".to_string()), Some("y".to_string())]
    );
    assert_eq!(
        strings(&table, "_source_file"),
        vec![Some("raw/a.csv".to_string()), Some("raw/b.csv".to_string())]
    );
}

#[tokio::test]
async fn missing_source_file_is_a_source_error() {
    let lakehouse = lakehouse();
    let err = lakehouse
        .ingest_json_to_bronze("raw/missing.json", "bronze")
        .await
        .unwrap_err();
    assert!(matches!(err, LakehouseError::Source { .. }));
}

#[tokio::test]
async fn full_medallion_flow() {
    let lakehouse = lakehouse();
    seed(&lakehouse).await;

    lakehouse
        .ingest_csv_to_bronze("raw/orders.csv", "bronze_orders")
        .await
        .unwrap();
    lakehouse
        .ingest_json_to_bronze("raw/products.json", "dim_product")
        .await
        .unwrap();

    let options = CleanOptions::new(["order_id"])
        .standardize(["status"])
        .require_not_null(["order_id", "customer"]);
    let silver = lakehouse
        .clean_to_silver("bronze_orders", "silver_orders", &options)
        .await
        .unwrap();

    // order 1 appears twice with the same ingestion time; the first row wins.
    assert_eq!(int64s(&silver, "order_id"), vec![1, 2, 3]);
    assert_eq!(
        strings(&silver, "status"),
        vec![
            Some("new".to_string()),
            Some("shipped".to_string()),
            Some("new".to_string())
        ]
    );

    let lookups = [DimensionLookup::new("dim_product", "product_id", "product_key")];
    let gold = lakehouse
        .build_fact_table("silver_orders", &lookups, "fact_orders")
        .await
        .unwrap();

    let names: Vec<String> = gold
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(names, vec!["product_key", "amount", "quantity"]);
    // Order 3 references an unknown product and is dropped.
    assert_eq!(gold.num_rows(), 2);
    assert_eq!(int64s(&gold, "product_key"), vec![1, 2]);

    let amounts = gold
        .column_by_name("amount")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(amounts.value(1), 20.0);

    let stored = lakehouse.read_table("fact_orders", None).await.unwrap();
    assert_eq!(stored.num_rows(), 2);
}

#[tokio::test]
async fn failed_validation_leaves_silver_untouched() {
    let lakehouse = lakehouse();
    lakehouse
        .upload_file(
            "raw/people.csv",
            b"id,email\n1,a@example.com\n2,\n".to_vec(),
        )
        .await
        .unwrap();
    lakehouse
        .ingest_csv_to_bronze("raw/people.csv", "bronze_people")
        .await
        .unwrap();

    let options = CleanOptions::new(["id"]).require_not_null(["email"]);
    let err = lakehouse
        .clean_to_silver("bronze_people", "silver_people", &options)
        .await
        .unwrap_err();

    match err {
        LakehouseError::Pipeline(PipelineError::NullValues {
            table,
            column,
            count,
        }) => {
            assert_eq!(table, "silver_people");
            assert_eq!(column, "email");
            assert_eq!(count, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!lakehouse.store().exists("silver_people").await.unwrap());
}

#[tokio::test]
async fn build_fact_requires_dimension_tables() {
    let lakehouse = lakehouse();
    seed(&lakehouse).await;
    lakehouse
        .ingest_csv_to_bronze("raw/orders.csv", "silver_orders")
        .await
        .unwrap();

    let lookups = [DimensionLookup::new("dim_missing", "product_id", "product_key")];
    let err = lakehouse
        .build_fact_table("silver_orders", &lookups, "fact")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LakehouseError::Table(TableError::NotFound { .. })
    ));
}

#[tokio::test]
async fn quality_checks_on_stored_table() {
    let lakehouse = lakehouse();
    seed(&lakehouse).await;
    lakehouse
        .ingest_csv_to_bronze("raw/orders.csv", "bronze_orders")
        .await
        .unwrap();

    let checks = vec![
        ("null_customer", Predicate::is_null("customer")),
        ("big_order", Predicate::gt("amount", 15.0)),
    ];
    let report = lakehouse
        .run_quality_checks("bronze_orders", &checks)
        .await
        .unwrap();

    assert!(!report.passed());
    assert_eq!(report.get("null_customer").unwrap().failures, 0);
    let big = report.get("big_order").unwrap();
    assert_eq!(big.failures, 1);
    assert_eq!(big.rate, 25.0);
}

#[tokio::test]
async fn maintenance_through_the_facade() {
    let lakehouse = lakehouse();
    seed(&lakehouse).await;
    for _ in 0..3 {
        lakehouse
            .ingest_csv_to_bronze("raw/orders.csv", "bronze_orders")
            .await
            .unwrap();
    }

    let compacted = lakehouse.optimize_table("bronze_orders", &[]).await.unwrap();
    assert_eq!(compacted.strategy, OptimizeStrategy::Compact);
    assert_eq!(compacted.files_removed, 3);

    let clustered = lakehouse
        .optimize_table("bronze_orders", &["customer", "order_id"])
        .await
        .unwrap();
    assert_eq!(clustered.strategy, OptimizeStrategy::ZOrder);
    assert_eq!(clustered.rows_rewritten, 12);

    let history = lakehouse.history("bronze_orders").await.unwrap();
    assert_eq!(history[0].operation, Operation::Optimize);
    assert_eq!(history.len(), 5);

    let vacuum = lakehouse
        .vacuum_table("bronze_orders", None, true)
        .await
        .unwrap();
    assert!(vacuum.dry_run);
    assert!(vacuum.files_deleted.is_empty());

    let err = lakehouse
        .vacuum_table("bronze_orders", Some(0), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LakehouseError::Table(TableError::RetentionTooShort { .. })
    ));
}

#[tokio::test]
async fn filesystem_backend_persists_tables() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RuntimeConfig::default();
    config.storage.backend = StorageBackend::Fs;
    config.storage.fs = Some(FsConfig {
        path: dir.path().to_string_lossy().into_owned(),
    });

    let lakehouse = Lakehouse::new(&config).unwrap();
    seed(&lakehouse).await;
    lakehouse
        .ingest_json_to_bronze("raw/products.json", "dim_product")
        .await
        .unwrap();

    assert!(dir
        .path()
        .join("Tables/dim_product/_manifests/00000000000000000000.json")
        .exists());

    // A fresh handle over the same directory sees the committed table.
    let reopened = Lakehouse::new(&config).unwrap();
    let batch = reopened.read_table("dim_product", None).await.unwrap();
    assert_eq!(batch.num_rows(), 2);
    assert_eq!(batch.column_by_name("name").unwrap().null_count(), 0);
}
