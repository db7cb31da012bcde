//! Wiring a small storefront with the object factory.
//!
//! Run with `RUST_LOG=masnaa_factory=debug cargo run --example wiring`
//! to watch constructor selection and early references at work.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use masnaa::logging::init_tracing;
use masnaa::prelude::*;

// === Types ===

trait Notifier: Send + Sync {
    fn notify(&self, msg: &str);
}

struct ConsoleNotifier {
    prefix: String,
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, msg: &str) {
        println!("{} {msg}", self.prefix);
    }
}

struct Database {
    url: String,
    pool: u32,
}

/// Stock levels; knows the order book through a property.
struct Inventory {
    db: Arc<Database>,
    orders: OnceCell<Arc<OrderBook>>,
}

/// Orders; knows the inventory through a property, closing the cycle.
struct OrderBook {
    notifier: Arc<dyn Notifier>,
    inventory: OnceCell<Arc<Inventory>>,
}

impl OrderBook {
    fn place(&self, item: &str) {
        let store = self
            .inventory
            .get()
            .map(|inventory| inventory.db.url.as_str())
            .unwrap_or("<unwired>");
        self.notifier.notify(&format!("order for {item} recorded in {store}"));
    }
}

struct Receipt {
    number: u64,
}

// === Catalog entries, collected at compile time ===

fn describe_notifier() -> TypeDescriptor {
    TypeDescriptor::builder::<ConsoleNotifier>()
        .constructor("new", vec![ParamSpec::of::<String>("prefix")], |args| {
            Ok(ConsoleNotifier { prefix: args.value(0)? })
        })
        .implements::<Arc<dyn Notifier>, _>(|notifier| notifier as Arc<dyn Notifier>)
        .build()
}

fn describe_database() -> TypeDescriptor {
    TypeDescriptor::builder::<Database>()
        .constructor("new", vec![ParamSpec::of::<String>("url")], |args| {
            Ok(Database { url: args.value(0)?, pool: 4 })
        })
        .constructor(
            "with_pool",
            vec![ParamSpec::of::<String>("url"), ParamSpec::of::<u32>("pool")],
            |args| Ok(Database { url: args.value(0)?, pool: args.value(1)? }),
        )
        .build()
}

fn describe_inventory() -> TypeDescriptor {
    TypeDescriptor::builder::<Inventory>()
        .constructor("new", vec![ParamSpec::of::<Database>("db")], |args| {
            Ok(Inventory { db: args.get(0)?, orders: OnceCell::new() })
        })
        .setter::<OrderBook, _>("orders", |inventory, orders| {
            inventory.orders.set(orders).map_err(|_| "orders already wired".into())
        })
        .build()
}

fn describe_order_book() -> TypeDescriptor {
    TypeDescriptor::builder::<OrderBook>()
        .constructor("new", vec![ParamSpec::of::<Arc<dyn Notifier>>("notifier")], |args| {
            Ok(OrderBook { notifier: args.value(0)?, inventory: OnceCell::new() })
        })
        .setter::<Inventory, _>("inventory", |orders, inventory| {
            orders.inventory.set(inventory).map_err(|_| "inventory already wired".into())
        })
        .build()
}

fn describe_receipt() -> TypeDescriptor {
    TypeDescriptor::builder::<Receipt>()
        .constructor("new", vec![ParamSpec::of::<u64>("number")], |args| {
            Ok(Receipt { number: args.value(0)? })
        })
        .build()
}

inventory::submit! { TypeRegistration::new(describe_notifier) }
inventory::submit! { TypeRegistration::new(describe_database) }
inventory::submit! { TypeRegistration::new(describe_inventory) }
inventory::submit! { TypeRegistration::new(describe_order_book) }
inventory::submit! { TypeRegistration::new(describe_receipt) }

fn main() -> Result<()> {
    init_tracing("masnaa_factory=info");

    let factory = ObjectFactory::builder()
        .definition(ObjectDefinition::of::<ConsoleNotifier>("notifier").arg(ArgumentValue::literal("[shop]")))
        // A template: never built, only inherited from.
        .definition(
            ObjectDefinition::of::<Database>("databaseTemplate")
                .arg(ArgumentValue::literal("postgres://localhost/shop"))
                .abstract_template(),
        )
        .definition(
            ObjectDefinition::new("database")
                .parent("databaseTemplate")
                .indexed_arg(1, ArgumentValue::literal("16")),
        )
        .definition(
            ObjectDefinition::of::<Inventory>("inventory")
                .arg(ArgumentValue::reference("database"))
                .property("orders", ArgumentValue::reference("orders")),
        )
        .definition(
            ObjectDefinition::of::<OrderBook>("orders")
                .autowire(AutowireMode::Constructor)
                .property("inventory", ArgumentValue::reference("inventory")),
        )
        .definition(ObjectDefinition::of::<Receipt>("receipt").scope(Scope::PerRequest))
        .build()?;

    factory.preinstantiate_singletons()?;
    tracing::info!(objects = factory.definition_names().len(), "storefront wired");

    let database = factory.get::<Database>("database")?;
    println!("database: {} (pool of {})", database.url, database.pool);

    let orders = factory.get::<OrderBook>("orders")?;
    orders.place("saffron");

    let inventory = factory.get::<Inventory>("inventory")?;
    let wired_back = inventory
        .orders
        .get()
        .is_some_and(|book| Arc::ptr_eq(book, &orders));
    println!("inventory and order book see each other: {wired_back}");

    for number in [1001u64, 1002] {
        let receipt = factory.get_with_args("receipt", vec![Instance::new(number)])?;
        if let Some(receipt) = receipt.downcast::<Receipt>() {
            println!("receipt #{}", receipt.number);
        }
    }

    Ok(())
}
