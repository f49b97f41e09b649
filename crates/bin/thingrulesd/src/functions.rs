//! Rule functions compiled into the daemon.
//!
//! Rule modules bind these by name to trigger declarations. Parameter names
//! other than `initiator` are device names, resolved when the rule fires.

use thingrules_app::error::BoxError;
use thingrules_app::function::{FunctionCatalog, INITIATOR, RuleArgs, RuleFunction};
use thingrules_domain::property::PropertyValue;
use thingrules_domain::time::local_now;

/// Every function a rule module may name.
pub fn catalog() -> FunctionCatalog {
    FunctionCatalog::new()
        .with(RuleFunction::new(
            "remember_start",
            &["db", INITIATOR],
            remember_start,
        ))
        .with(RuleFunction::new(
            "count_trigger",
            &["db", INITIATOR],
            count_trigger,
        ))
        .with(RuleFunction::new("lights_off", &["lamp"], lights_off))
        .with(RuleFunction::new(
            "follow_switch",
            &["switch", "lamp"],
            follow_switch,
        ))
}

/// Store when the rule was loaded (`started_at`, local RFC 3339).
async fn remember_start(args: RuleArgs) -> Result<(), BoxError> {
    let db = args.device("db")?;
    db.set_property(
        "started_at",
        PropertyValue::from(local_now().to_rfc3339()),
        args.initiator(),
    )
    .await;
    Ok(())
}

/// Count firings per initiator in `db` under `count.<initiator>`.
async fn count_trigger(args: RuleArgs) -> Result<(), BoxError> {
    let db = args.device("db")?;
    let key = format!("count.{}", args.initiator());
    let current = db
        .get_property_or(&key, PropertyValue::Number(0.0))
        .await
        .as_f64()
        .unwrap_or_default();
    db.set_property(&key, PropertyValue::Number(current + 1.0), args.initiator())
        .await;
    Ok(())
}

async fn lights_off(args: RuleArgs) -> Result<(), BoxError> {
    let lamp = args.device("lamp")?;
    lamp.set_property("on", PropertyValue::Bool(false), args.initiator())
        .await;
    Ok(())
}

/// Mirror the switch's `on` state onto the lamp.
async fn follow_switch(args: RuleArgs) -> Result<(), BoxError> {
    let switch = args.device("switch")?;
    let lamp = args.device("lamp")?;
    let Some(on) = switch.get_property("on", false).await else {
        return Err("switch state is unknown".into());
    };
    lamp.set_property("on", on, args.initiator()).await;
    Ok(())
}
