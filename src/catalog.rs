//! Product catalog service.
//!
//! Two operations behind the authentication layer: `ProductInfo/AddProduct`
//! stores a product under a fresh UUID and returns `{"value": id}`;
//! `ProductInfo/GetProduct` takes `{"value": id}` and returns the product or
//! `NOT_FOUND`. Storage is in memory.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::rpc::{IncomingCall, RpcClient, RpcHandler};
use crate::{Error, Result};

/// Add a product.
pub const ADD_PRODUCT: &str = "ProductInfo/AddProduct";
/// Fetch a product by id.
pub const GET_PRODUCT: &str = "ProductInfo/GetProduct";

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Assigned by the server; ignored on create.
    #[serde(default)]
    pub id: String,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Unit price
    pub price: f32,
}

impl Product {
    /// New product without an id.
    pub fn new(name: impl Into<String>, description: impl Into<String>, price: f32) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: description.into(),
            price,
        }
    }
}

/// Wrapper carrying a product id on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductId {
    /// UUID string
    pub value: String,
}

/// In-memory product store.
#[derive(Debug, Default)]
pub struct ProductStore {
    products: DashMap<String, Product>,
}

impl ProductStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `product` under a new id and return the id.
    pub fn create(&self, mut product: Product) -> String {
        let id = Uuid::new_v4().to_string();
        product.id.clone_from(&id);
        self.products.insert(id.clone(), product);
        id
    }

    /// Look up a product.
    pub fn fetch(&self, id: &str) -> Result<Product> {
        self.products
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("product '{id}' does not exist")))
    }

    /// Number of stored products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// Handler serving the catalog methods.
#[derive(Debug, Default)]
pub struct CatalogService {
    store: ProductStore,
}

impl CatalogService {
    /// Service over an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &ProductStore {
        &self.store
    }
}

#[async_trait]
impl RpcHandler for CatalogService {
    async fn handle(&self, call: IncomingCall) -> Result<Value> {
        let principal = call.principal.as_ref().map_or("-", |p| p.subject.as_str());
        match call.method.as_str() {
            ADD_PRODUCT => {
                let product: Product = parse_params(call.params)?;
                let name = product.name.clone();
                let id = self.store.create(product);
                info!(id = %id, name = %name, principal = %principal, "Product added");
                Ok(serde_json::to_value(ProductId { value: id })?)
            }
            GET_PRODUCT => {
                let ProductId { value } = parse_params(call.params)?;
                let product = self.store.fetch(&value)?;
                info!(
                    id = %product.id,
                    name = %product.name,
                    principal = %principal,
                    "Product retrieved"
                );
                Ok(serde_json::to_value(product)?)
            }
            other => Err(Error::Unimplemented(format!("unknown method '{other}'"))),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::Protocol(format!("invalid params: {e}")))
}

/// Typed client for the catalog methods.
#[derive(Debug)]
pub struct CatalogClient {
    rpc: RpcClient,
}

impl CatalogClient {
    /// Wrap an RPC client.
    #[must_use]
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// Add a product and return its id.
    pub async fn add_product(&self, product: &Product) -> Result<String> {
        let params = json!({
            "name": product.name,
            "description": product.description,
            "price": product.price,
        });
        let id: ProductId = serde_json::from_value(self.rpc.call(ADD_PRODUCT, params).await?)?;
        Ok(id.value)
    }

    /// Fetch a product by id.
    pub async fn get_product(&self, id: &str) -> Result<Product> {
        let params = serde_json::to_value(ProductId {
            value: id.to_string(),
        })?;
        Ok(serde_json::from_value(self.rpc.call(GET_PRODUCT, params).await?)?)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rpc::StatusCode;

    fn add_call(params: Value) -> IncomingCall {
        IncomingCall::new(ADD_PRODUCT, params)
    }

    #[tokio::test]
    async fn add_then_get_returns_stored_product() {
        let service = CatalogService::new();

        let added = service
            .handle(add_call(json!({
                "name": "Apple iPhone 11",
                "description": "Meet Apple iPhone 11.",
                "price": 699.0
            })))
            .await
            .unwrap();
        let id = added["value"].as_str().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok());

        let fetched = service
            .handle(IncomingCall::new(GET_PRODUCT, json!({ "value": id })))
            .await
            .unwrap();
        let product: Product = serde_json::from_value(fetched).unwrap();

        assert_eq!(
            product,
            Product {
                id,
                name: "Apple iPhone 11".to_string(),
                description: "Meet Apple iPhone 11.".to_string(),
                price: 699.0,
            }
        );
    }

    #[tokio::test]
    async fn client_supplied_id_is_replaced() {
        let service = CatalogService::new();
        let added = service
            .handle(add_call(json!({"id": "mine", "name": "x", "price": 1.0})))
            .await
            .unwrap();
        assert_ne!(added["value"], "mine");
        assert!(service.store().fetch("mine").is_err());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let service = CatalogService::new();
        let err = service
            .handle(IncomingCall::new(GET_PRODUCT, json!({"value": "nope"})))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn bad_params_are_invalid_argument() {
        let service = CatalogService::new();
        let err = service.handle(add_call(json!({"name": 5}))).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidArgument);
        assert!(service.store().is_empty());
    }

    #[tokio::test]
    async fn unknown_method_is_unimplemented() {
        let service = CatalogService::new();
        let err = service
            .handle(IncomingCall::new("ProductInfo/DeleteProduct", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::Unimplemented);
    }

    #[test]
    fn ids_are_unique() {
        let store = ProductStore::new();
        let a = store.create(Product::new("a", "", 1.0));
        let b = store.create(Product::new("a", "", 1.0));
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }
}
