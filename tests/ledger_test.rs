mod common;

use std::time::Duration;

use anyhow::Result;
use common::{ctx, funded_wallet, shared_test_service, test_service};
use uuid::Uuid;
use wallet_ledger::application::{LedgerError, OpContext};
use wallet_ledger::domain::{format_cents, parse_cents};
use wallet_ledger::storage::{UnitOfWork, WalletStore};

#[tokio::test]
async fn test_deposit_creates_missing_wallet() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let id = Uuid::new_v4();

    let result = service
        .deposit_or_create(&ctx(), id, parse_cents("25.00")?)
        .await?;
    assert!(result.created);

    let balance = service.get_balance(&ctx(), id).await?;
    assert_eq!(balance, 2500);
    assert_eq!(format_cents(balance), "25.00");

    Ok(())
}

#[tokio::test]
async fn test_plain_deposit_requires_existing_wallet() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let id = Uuid::new_v4();

    let err = service.deposit(&ctx(), id, 1000).await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletNotFound(missing) if missing == id));

    // No row was left behind by the failed deposit
    assert!(matches!(
        service.get_balance(&ctx(), id).await,
        Err(LedgerError::WalletNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_new_wallet_deposit_and_withdraw() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let id = funded_wallet(&service, 1000).await?;
    assert_eq!(service.get_balance(&ctx(), id).await?, 1000);

    service.deposit(&ctx(), id, 500).await?;
    assert_eq!(service.get_balance(&ctx(), id).await?, 1500);

    service.withdraw(&ctx(), id, 500).await?;
    assert_eq!(service.get_balance(&ctx(), id).await?, 1000);

    Ok(())
}

#[tokio::test]
async fn test_withdraw_not_enough_funds() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let id = funded_wallet(&service, 10000).await?;

    let err = service.withdraw(&ctx(), id, 150000).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            balance: 10000,
            required: 150000,
            ..
        }
    ));
    assert_eq!(service.get_balance(&ctx(), id).await?, 10000);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_create_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let id = funded_wallet(&service, 300).await?;

    let err = service.create_wallet(&ctx(), id, 999).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyExists(existing) if existing == id));
    assert_eq!(service.get_balance(&ctx(), id).await?, 300);

    Ok(())
}

#[tokio::test]
async fn test_missing_wallet_is_not_zero() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service.get_balance(&ctx(), Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletNotFound(_)));
    assert!(err.is_client_error());

    Ok(())
}

#[tokio::test]
async fn test_consecutive_reads_match() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let id = funded_wallet(&service, 777).await?;

    let first = service.get_balance(&ctx(), id).await?;
    let second = service.get_balance(&ctx(), id).await?;
    assert_eq!(first, second);

    Ok(())
}

#[tokio::test]
async fn test_conservation_with_rejections() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let id = funded_wallet(&service, 0).await?;

    let mut expected: i64 = 0;
    let ops: [(bool, i64); 8] = [
        (true, 5000),
        (false, 2000),
        (false, 4000), // rejected: only 3000 left
        (true, 1),
        (false, 3001),
        (false, 1), // rejected: empty
        (true, 250),
        (false, 100),
    ];

    for (is_deposit, amount) in ops {
        if is_deposit {
            service.deposit(&ctx(), id, amount).await?;
            expected += amount;
        } else {
            match service.withdraw(&ctx(), id, amount).await {
                Ok(_) => expected -= amount,
                Err(LedgerError::InsufficientFunds { balance, .. }) => {
                    assert_eq!(balance, expected);
                }
                Err(other) => return Err(other.into()),
            }
        }
        assert_eq!(service.get_balance(&ctx(), id).await?, expected);
    }

    assert_eq!(expected, 150);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_on_sqlite() -> Result<()> {
    let (service, _temp) = shared_test_service().await?;
    let id = funded_wallet(&service, 0).await?;

    const TASKS: i64 = 200;

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.deposit(&OpContext::background(), id, 100).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        handle.await??;
        successes += 1;
    }

    assert_eq!(successes, TASKS);
    assert_eq!(service.get_balance(&ctx(), id).await?, TASKS * 100);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mixed_operations_on_sqlite() -> Result<()> {
    let (service, _temp) = shared_test_service().await?;
    let id = funded_wallet(&service, 1000).await?;

    // 100 deposits and 150 withdrawals of 10 each, interleaved arbitrarily.
    // Whatever order the locks are granted in, the final balance must equal
    // the sum of the operations that succeeded.
    let handles: Vec<_> = (0..250)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let ctx = OpContext::background();
                if i % 5 < 2 {
                    service.deposit(&ctx, id, 10).await.map(|_| 10)
                } else {
                    service.withdraw(&ctx, id, 10).await.map(|_| -10)
                }
            })
        })
        .collect();

    let mut expected: i64 = 1000;
    for handle in handles {
        match handle.await? {
            Ok(delta) => expected += delta,
            Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }

    let balance = service.get_balance(&ctx(), id).await?;
    assert_eq!(balance, expected);
    assert!(balance >= 0);

    Ok(())
}

#[tokio::test]
async fn test_deadline_rolls_back_on_sqlite() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let id = funded_wallet(&service, 1000).await?;

    // Hold the write lock from another unit of work
    let mut holder = service.store().begin().await?;
    assert_eq!(holder.lock(id).await?, Some(1000));

    let short = OpContext::with_timeout(Duration::from_millis(100));
    let err = service.withdraw(&short, id, 100).await.unwrap_err();
    assert!(matches!(err, LedgerError::StorageUnavailable(_)));

    holder.rollback().await?;
    assert_eq!(service.get_balance(&ctx(), id).await?, 1000);

    service.withdraw(&ctx(), id, 100).await?;
    assert_eq!(service.get_balance(&ctx(), id).await?, 900);

    Ok(())
}
