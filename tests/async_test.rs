//! Async Execution Tests
//!
//! The async entry points share the blocking code path. These tests check
//! that results match, that cancellation stops before the next I/O step, and
//! that cancelled work stays queued.

mod common;

use spiteorm::driver::SqliteDriver;
use spiteorm::{
    BatchingCommandProcessor, CommandProcessor, CommandProcessorContext, Error, ParameterContext,
    SimpleCommandProcessor, Value,
};
use tokio_util::sync::CancellationToken;

fn context() -> CommandProcessorContext {
    CommandProcessorContext::new(ParameterContext::new(), false)
}

#[tokio::test]
async fn async_batch_loads_and_persists() {
    let driver = common::customer_driver();
    common::seed_customers(&driver, 2);
    let (factory, stats) = common::counting_factory(driver.clone());
    let mut processor = BatchingCommandProcessor::new(factory, 10);
    let token = CancellationToken::new();

    let request = common::load_customer_request();
    let first = common::load_customer(&request, 1);
    let second = common::load_customer(&request, 2);
    processor.register_task(first.clone().into());
    processor.register_task(common::insert_customer(3, "three").into());
    processor.register_task(second.clone().into());

    processor.execute_tasks_async(&mut context(), &token).await.unwrap();

    assert_eq!(stats.executions(), 1);
    assert_eq!(common::names(&first.output()), vec![Value::from("customer-1")]);
    assert_eq!(common::names(&second.output()), vec![Value::from("customer-2")]);
    assert_eq!(common::count_rows(&driver, "customer"), 3);
    assert!(stats.all_commands_closed());
}

#[tokio::test]
async fn cancelled_token_leaves_tasks_queued() {
    let driver = common::customer_driver();
    let (factory, stats) = common::counting_factory(driver.clone());
    let mut processor = BatchingCommandProcessor::new(factory, 10);

    processor.register_task(common::insert_customer(1, "one").into());
    processor.register_task(common::insert_customer(2, "two").into());

    let token = CancellationToken::new();
    token.cancel();

    let err = processor.execute_tasks_async(&mut context(), &token).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(processor.pending_task_count(), 2);
    assert_eq!(stats.executions(), 0);
    assert_eq!(common::count_rows(&driver, "customer"), 0);

    processor
        .execute_tasks_async(&mut context(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(common::count_rows(&driver, "customer"), 2);
}

#[tokio::test]
async fn cancelled_token_stops_simple_processor() {
    let driver = common::customer_driver();
    let (factory, stats) = common::counting_factory(driver);
    let mut processor = SimpleCommandProcessor::new(factory);
    processor.register_task(common::insert_customer(1, "one").into());

    let token = CancellationToken::new();
    token.cancel();

    let err = processor.execute_tasks_async(&mut context(), &token).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(processor.pending_task_count(), 1);
    assert_eq!(stats.executions(), 0);
}

#[tokio::test]
async fn async_reader_streams_rows() {
    let driver = common::customer_driver();
    let (factory, stats) = common::counting_factory(driver);
    let mut processor = BatchingCommandProcessor::new(factory, 10);
    let token = CancellationToken::new();

    for id in 1..=3 {
        processor.register_task(common::insert_customer(id, &format!("c{id}")).into());
    }

    let mut reader = processor
        .execute_tasks_with_reader_async(common::all_customers_request(), &mut context(), &token)
        .await
        .unwrap();

    let mut names = Vec::new();
    while reader.move_next_async(&token).await.unwrap() {
        names.push(reader.current().unwrap().get_value_or_default(1));
    }
    assert_eq!(names, vec![Value::from("c1"), Value::from("c2"), Value::from("c3")]);

    reader.dispose_async().await;
    assert!(stats.all_commands_closed());
}

#[tokio::test]
async fn cancelling_mid_read_fails_next_row() {
    let driver = common::customer_driver();
    common::seed_customers(&driver, 2);
    let (factory, _stats) = common::counting_factory(driver);
    let mut processor = BatchingCommandProcessor::new(factory, 10);
    let token = CancellationToken::new();

    let mut reader = processor
        .execute_tasks_with_reader_async(common::all_customers_request(), &mut context(), &token)
        .await
        .unwrap();
    assert!(reader.move_next_async(&token).await.unwrap());

    token.cancel();
    assert!(matches!(reader.move_next_async(&token).await, Err(Error::Cancelled)));
}

#[tokio::test]
async fn file_backed_database_persists_across_reopen() {
    let (_dir, path) = common::create_temp_db_file("orders.db");

    {
        let driver = SqliteDriver::open(&path).unwrap();
        let (factory, _stats) = common::counting_factory(driver);
        let mut processor = BatchingCommandProcessor::new(factory, 4);
        for id in 1..=6 {
            processor.register_task(common::insert_customer(id, "persisted").into());
        }
        processor
            .execute_tasks_async(&mut context(), &CancellationToken::new())
            .await
            .unwrap();
    }

    let reopened = SqliteDriver::open(&path).unwrap();
    assert_eq!(common::count_rows(&reopened, "customer"), 6);
}
