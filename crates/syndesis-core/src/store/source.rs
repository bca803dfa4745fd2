// ── Remote source seam ──
//
// The store talks to the server only through `RemoteSource`, so tests can
// drive it with an in-memory fake and production uses `ResourceClient`.

use std::future::Future;
use std::marker::PhantomData;

use syndesis_api::{ApiClient, ResourceEndpoints};

use crate::error::CoreError;
use crate::model::Entity;

/// CRUD operations for one entity kind.
pub trait RemoteSource<T: Entity>: Send + Sync + 'static {
    fn list(&self) -> impl Future<Output = Result<Vec<T>, CoreError>> + Send;

    /// Point fetch. A missing entity is reported as [`CoreError::NotFound`].
    fn get(&self, id: &str) -> impl Future<Output = Result<T, CoreError>> + Send;

    fn create(&self, entity: &T) -> impl Future<Output = Result<T, CoreError>> + Send;

    fn update(&self, id: &str, entity: &T) -> impl Future<Output = Result<T, CoreError>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// [`RemoteSource`] backed by the REST API.
pub struct ResourceClient<T> {
    api: ApiClient,
    endpoints: ResourceEndpoints,
    _entity: PhantomData<fn() -> T>,
}

impl<T> ResourceClient<T> {
    pub fn new(api: ApiClient, endpoints: ResourceEndpoints) -> Self {
        Self {
            api,
            endpoints,
            _entity: PhantomData,
        }
    }

    pub fn endpoints(&self) -> &ResourceEndpoints {
        &self.endpoints
    }
}

impl<T> Clone for ResourceClient<T> {
    fn clone(&self) -> Self {
        Self::new(self.api.clone(), self.endpoints.clone())
    }
}

impl<T: Entity> ResourceClient<T> {
    fn not_found(id: &str) -> CoreError {
        CoreError::NotFound {
            kind: T::KIND.to_owned(),
            id: id.to_owned(),
        }
    }
}

impl<T: Entity> RemoteSource<T> for ResourceClient<T> {
    async fn list(&self) -> Result<Vec<T>, CoreError> {
        Ok(self.api.list(&self.endpoints).await?)
    }

    async fn get(&self, id: &str) -> Result<T, CoreError> {
        self.api
            .get_item(&self.endpoints, id)
            .await
            .map_err(|e| if e.is_not_found() { Self::not_found(id) } else { e.into() })
    }

    async fn create(&self, entity: &T) -> Result<T, CoreError> {
        let created: T = self.api.create(&self.endpoints, entity).await?;
        if created.id().is_none() {
            return Err(CoreError::Internal(format!(
                "server returned a {} without an id",
                T::KIND
            )));
        }
        Ok(created)
    }

    async fn update(&self, id: &str, entity: &T) -> Result<T, CoreError> {
        self.api
            .update(&self.endpoints, id, entity)
            .await
            .map_err(|e| if e.is_not_found() { Self::not_found(id) } else { e.into() })
    }

    async fn delete(&self, id: &str) -> Result<(), CoreError> {
        self.api
            .delete_item(&self.endpoints, id)
            .await
            .map_err(|e| if e.is_not_found() { Self::not_found(id) } else { e.into() })
    }
}
