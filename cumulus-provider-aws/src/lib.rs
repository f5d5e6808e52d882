//! Cumulus AWS Provider
//!
//! AWS Provider implementation. Each resource type is a handler in
//! [`resources`]; [`AwsProvider`] dispatches core operations to them.

pub mod config;
pub mod error;
pub mod id;
pub mod resources;
pub mod schemas;
pub mod tags;
#[cfg(test)]
mod testing;

use cumulus_core::provider::{
    BoxFuture, Provider, ProviderError, ProviderResult, ResourceType,
};
use cumulus_core::resource::{Resource, ResourceId, State};
use cumulus_core::schema::ResourceSchema;

pub use config::{AwsClient, ConfigError, ProviderConfig};
use resources::{
    DataSourceHandler, ResourceHandler, data_source_handlers, find_data_source, find_resource,
    resource_handlers,
};

/// Managed resource type backed by a handler
struct HandlerType(&'static dyn ResourceHandler);

impl ResourceType for HandlerType {
    fn name(&self) -> &'static str {
        self.0.resource_type()
    }

    fn schema(&self) -> ResourceSchema {
        self.0.schema()
    }
}

/// Data source type backed by a handler
struct DataSourceType(&'static dyn DataSourceHandler);

impl ResourceType for DataSourceType {
    fn name(&self) -> &'static str {
        self.0.resource_type()
    }

    fn schema(&self) -> ResourceSchema {
        self.0.schema()
    }

    fn is_data_source(&self) -> bool {
        true
    }
}

fn unknown_type(id: &ResourceId) -> ProviderError {
    ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
        .for_resource(id.clone())
}

fn handler_for(id: &ResourceId) -> ProviderResult<&'static dyn ResourceHandler> {
    find_resource(&id.resource_type).ok_or_else(|| unknown_type(id))
}

/// AWS Provider
pub struct AwsProvider {
    client: AwsClient,
}

impl AwsProvider {
    /// Create a new AWS Provider from its configuration block
    pub async fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: AwsClient::new(config).await?,
        })
    }

    /// Create with a prepared client bundle (for testing)
    pub fn with_client(client: AwsClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AwsClient {
        &self.client
    }
}

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        let mut types: Vec<Box<dyn ResourceType>> = resource_handlers()
            .into_iter()
            .map(|h| Box::new(HandlerType(h)) as Box<dyn ResourceType>)
            .collect();
        types.extend(
            data_source_handlers()
                .into_iter()
                .map(|h| Box::new(DataSourceType(h)) as Box<dyn ResourceType>),
        );
        types
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(String::from);
        Box::pin(async move {
            let handler = handler_for(&id)?;
            match identifier {
                Some(identifier) => handler.read(&self.client, &id, &identifier).await,
                None => Ok(State::not_found(id)),
            }
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            let handler = handler_for(&resource.id)?;
            log::debug!("Creating {}", resource.id);
            handler.create(&self.client, &resource).await
        })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move {
            let handler = handler_for(&id)?;
            log::debug!("Updating {} ({})", id, identifier);
            handler
                .update(&self.client, &id, &identifier, &from, &to)
                .await
        })
    }

    fn delete(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        Box::pin(async move {
            let handler = handler_for(&id)?;
            log::debug!("Deleting {} ({})", id, identifier);
            handler.delete(&self.client, &id, &identifier, &from).await
        })
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            let handler =
                find_data_source(&resource.id.resource_type).ok_or_else(|| unknown_type(&resource.id))?;
            handler.read(&self.client, &resource).await
        })
    }

    fn import(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let import_id = identifier.to_string();
        Box::pin(async move {
            let handler = handler_for(&id)?;
            let identifier = handler
                .import_identifier(&import_id)
                .map_err(|e| e.for_resource(id.clone()))?;
            log::info!("Importing {} as {}", identifier, id);
            let state = handler.read(&self.client, &id, &identifier).await?;
            if !state.exists {
                return Err(ProviderError::not_found(format!(
                    "Cannot import non-existent remote object '{}'",
                    import_id
                ))
                .for_resource(id));
            }
            Ok(state)
        })
    }
}
