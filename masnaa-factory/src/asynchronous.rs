//! Async access to an [`ObjectFactory`].
//!
//! Object construction is synchronous and may block on the singleton
//! lock, so async callers hand it to tokio's blocking pool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FactoryError, Result};
use crate::factory::ObjectFactory;
use crate::instance::Instance;

/// Object retrieval for async contexts.
#[async_trait]
pub trait AsyncObjectSource: Send + Sync {
    async fn get_instance_async(&self, name: &str) -> Result<Instance>;

    async fn get_async<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>>;

    async fn preinstantiate_singletons_async(&self) -> Result<()>;
}

#[async_trait]
impl AsyncObjectSource for Arc<ObjectFactory> {
    async fn get_instance_async(&self, name: &str) -> Result<Instance> {
        let factory = Arc::clone(self);
        let name = name.to_string();
        run_blocking(move || factory.get_instance(&name)).await
    }

    async fn get_async<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let factory = Arc::clone(self);
        let name = name.to_string();
        run_blocking(move || factory.get::<T>(&name)).await
    }

    async fn preinstantiate_singletons_async(&self) -> Result<()> {
        let factory = Arc::clone(self);
        run_blocking(move || factory.preinstantiate_singletons()).await
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| FactoryError::Invocation {
            callable: "blocking build task".into(),
            source: Box::new(err),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ParamSpec, TypeDescriptor};
    use crate::definition::{ArgumentValue, ObjectDefinition};

    struct Greeting(String);

    fn factory() -> Arc<ObjectFactory> {
        let catalog = Catalog::new();
        catalog.register(
            TypeDescriptor::builder::<Greeting>()
                .constructor("new", vec![ParamSpec::of::<String>("text")], |args| {
                    Ok(Greeting(args.value(0)?))
                })
                .build(),
        );
        Arc::new(
            ObjectFactory::builder()
                .catalog(catalog)
                .definition(ObjectDefinition::of::<Greeting>("greeting").arg(ArgumentValue::literal("salaam")))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn builds_on_blocking_pool() {
        let factory = factory();
        let greeting = factory.get_async::<Greeting>("greeting").await.unwrap();
        assert_eq!(greeting.0, "salaam");

        let again = factory.get_instance_async("greeting").await.unwrap();
        assert!(again.downcast::<Greeting>().is_some_and(|g| Arc::ptr_eq(&g, &greeting)));
    }

    #[tokio::test]
    async fn errors_cross_the_await() {
        let factory = factory();
        factory.preinstantiate_singletons_async().await.unwrap();
        assert!(matches!(
            factory.get_instance_async("missing").await,
            Err(FactoryError::NoSuchDefinition(_))
        ));
    }
}
