//! Recipe, ingredient and backup endpoints.
//!
//! Every call is authenticated through the shared `SessionManager`.

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::auth::SessionManager;
use crate::models::{ActionResponse, Ingredient, Paginated, Recipe, RecipePayload};

use super::{ApiError, FormPart, Method, RequestBody};

/// Upper bound on pages followed for one listing.
/// Guards against a server that keeps returning a `next` link.
const MAX_PAGES: usize = 100;

const RECIPES_PATH: &str = "/recipes/";
const INGREDIENTS_PATH: &str = "/ingredients/";
const BACKUP_PATH: &str = "/recipes/backup_recipes/";
const RESTORE_PATH: &str = "/recipes/restore_recipes/";

#[derive(Clone)]
pub struct RecipeClient {
    session: SessionManager,
}

impl RecipeClient {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Fetch a list endpoint and every page after it.
    async fn get_all<T: DeserializeOwned>(&self, path: String) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut next = Some(path);
        let mut pages = 0;

        while let Some(path) = next.take() {
            let page: Paginated<T> = self
                .session
                .make_authenticated_request(&path, Method::Get, None)
                .await?;
            items.extend(page.results);
            pages += 1;

            if pages >= MAX_PAGES {
                debug!(pages, "Stopped following pagination links");
                break;
            }
            next = page.next;
        }

        Ok(items)
    }

    // ===== Recipes =====

    pub async fn list_recipes(&self) -> Result<Vec<Recipe>, ApiError> {
        self.get_all(RECIPES_PATH.to_string()).await
    }

    pub async fn get_recipe(&self, id: i64) -> Result<Recipe, ApiError> {
        self.session
            .make_authenticated_request(&recipe_path(id), Method::Get, None)
            .await
    }

    /// Recipes containing all of the given ingredients.
    pub async fn search_recipes(&self, ingredient_ids: &[i64]) -> Result<Vec<Recipe>, ApiError> {
        if ingredient_ids.is_empty() {
            return self.list_recipes().await;
        }
        let query: Vec<String> = ingredient_ids
            .iter()
            .map(|id| format!("ingredients={}", id))
            .collect();
        self.get_all(format!("{}?{}", RECIPES_PATH, query.join("&")))
            .await
    }

    /// Recipes whose name matches `query`.
    pub async fn search_recipes_by_name(&self, query: &str) -> Result<Vec<Recipe>, ApiError> {
        self.get_all(format!(
            "{}?search={}",
            RECIPES_PATH,
            urlencoding::encode(query)
        ))
        .await
    }

    pub async fn create_recipe(&self, payload: &RecipePayload) -> Result<Recipe, ApiError> {
        let body = payload_body(payload)?;
        self.session
            .make_authenticated_request(RECIPES_PATH, Method::Post, Some(body))
            .await
    }

    pub async fn update_recipe(&self, id: i64, payload: &RecipePayload) -> Result<Recipe, ApiError> {
        let body = payload_body(payload)?;
        self.session
            .make_authenticated_request(&recipe_path(id), Method::Put, Some(body))
            .await
    }

    pub async fn delete_recipe(&self, id: i64) -> Result<(), ApiError> {
        self.session
            .make_authenticated_raw(&recipe_path(id), Method::Delete, None)
            .await?;
        Ok(())
    }

    // ===== Ingredients =====

    pub async fn list_ingredients(&self) -> Result<Vec<Ingredient>, ApiError> {
        self.get_all(INGREDIENTS_PATH.to_string()).await
    }

    // ===== Backup / restore =====

    /// Ask the server to write a backup. `None` backs up every recipe.
    pub async fn backup_recipes(&self, recipe_ids: Option<&[i64]>) -> Result<ActionResponse, ApiError> {
        let body = RequestBody::Json(json!({ "recipes": recipe_ids }));
        self.session
            .make_authenticated_request(BACKUP_PATH, Method::Post, Some(body))
            .await
    }

    /// Upload a backup file for the server to restore.
    pub async fn restore_recipes(
        &self,
        file_name: &str,
        contents: Vec<u8>,
        overwrite: bool,
    ) -> Result<ActionResponse, ApiError> {
        let body = RequestBody::Multipart(vec![
            FormPart::File {
                name: "backup_file".to_string(),
                file_name: file_name.to_string(),
                content_type: "application/json".to_string(),
                bytes: contents,
            },
            FormPart::Text {
                name: "overwrite".to_string(),
                value: overwrite.to_string(),
            },
        ]);
        self.session
            .make_authenticated_request(RESTORE_PATH, Method::Post, Some(body))
            .await
    }

    /// Download a file (e.g. a written backup) as raw bytes.
    pub async fn download_file(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .session
            .make_authenticated_raw(path, Method::Get, None)
            .await?;
        Ok(response.body)
    }
}

fn recipe_path(id: i64) -> String {
    format!("{}{}/", RECIPES_PATH, id)
}

fn payload_body(payload: &RecipePayload) -> Result<RequestBody, ApiError> {
    payload.validate().map_err(ApiError::InvalidRequest)?;
    let value =
        serde_json::to_value(payload).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
    Ok(RequestBody::Json(value))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::testing::{ok_json, status, ScriptedTransport};
    use crate::api::ApiResponse;
    use crate::auth::{KeyValueStore, MemoryStore, TOKEN_KEY};
    use crate::models::{Amount, RecipeIngredientInput, RecipeStepInput};

    fn client() -> (RecipeClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(MemoryStore::new());
        store
            .set(TOKEN_KEY, r#"{"access": "a.b.c", "refresh": "r1"}"#)
            .unwrap();
        let session = SessionManager::new(transport.clone(), store);
        session.initialize();
        (RecipeClient::new(session), transport)
    }

    fn recipe_json(id: i64, name: &str) -> serde_json::Value {
        json!({ "id": id, "name": name, "ingredients": [], "recipe_steps": [] })
    }

    #[tokio::test]
    async fn test_list_recipes_follows_pages() {
        let (client, transport) = client();
        let next = "http://localhost:8585/api/recipes/?page=2";
        transport.push(
            RECIPES_PATH,
            ok_json(json!({ "count": 2, "next": next, "previous": null, "results": [recipe_json(1, "Soup")] })),
        );
        transport.push(
            next,
            ok_json(json!({ "count": 2, "next": null, "previous": RECIPES_PATH, "results": [recipe_json(2, "Salad")] })),
        );

        let recipes = client.list_recipes().await.unwrap();
        let names: Vec<&str> = recipes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Soup", "Salad"]);
        assert!(client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_search_by_ingredients_repeats_key() {
        let (client, transport) = client();
        let path = "/recipes/?ingredients=3&ingredients=5";
        transport.push(
            path,
            ok_json(json!({ "count": 1, "next": null, "previous": null, "results": [recipe_json(1, "Stew")] })),
        );

        let recipes = client.search_recipes(&[3, 5]).await.unwrap();
        assert_eq!(recipes.len(), 1);
        assert_eq!(transport.count(path), 1);
    }

    #[tokio::test]
    async fn test_search_by_name_encodes_query() {
        let (client, transport) = client();
        let path = "/recipes/?search=mac%20%26%20cheese";
        transport.push(
            path,
            ok_json(json!({ "count": 0, "next": null, "previous": null, "results": [] })),
        );

        let recipes = client.search_recipes_by_name("mac & cheese").await.unwrap();
        assert!(recipes.is_empty());
        assert_eq!(transport.count(path), 1);
    }

    #[tokio::test]
    async fn test_create_recipe_validates_before_sending() {
        let (client, transport) = client();
        let payload = RecipePayload {
            name: "Toast".into(),
            ingredients: vec![],
            steps: vec![RecipeStepInput {
                order: 1,
                step: "Toast".into(),
                ingredients: vec![crate::models::StepIngredientReference { ingredient_index: 0 }],
            }],
        };

        let err = client.create_recipe(&payload).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_update_recipe_puts_payload() {
        let (client, transport) = client();
        transport.push("/recipes/4/", ok_json(recipe_json(4, "Toast")));
        let payload = RecipePayload {
            name: "Toast".into(),
            ingredients: vec![RecipeIngredientInput {
                name: "bread".into(),
                amount: Amount::Number(1.0),
                unit: "slice".into(),
            }],
            steps: vec![],
        };

        let recipe = client.update_recipe(4, &payload).await.unwrap();
        assert_eq!(recipe.id, 4);
        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.bearer.as_deref(), Some("a.b.c"));
        match &request.body {
            RequestBody::Json(body) => assert_eq!(body["ingredients"][0]["name"], "bread"),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_recipe_accepts_empty_reply() {
        let (client, transport) = client();
        transport.push("/recipes/9/", Ok(ApiResponse::new(204, Vec::new())));

        client.delete_recipe(9).await.unwrap();
        assert_eq!(transport.requests()[0].method, Method::Delete);
    }

    #[tokio::test]
    async fn test_backup_sends_selected_ids() {
        let (client, transport) = client();
        transport.push(
            BACKUP_PATH,
            ok_json(json!({ "status": "success", "message": "Recipes backed up to /media" })),
        );

        let reply = client.backup_recipes(Some(&[1, 2])).await.unwrap();
        assert!(reply.is_success());
        assert_eq!(
            transport.requests()[0].body,
            RequestBody::Json(json!({ "recipes": [1, 2] }))
        );
    }

    #[tokio::test]
    async fn test_restore_uploads_multipart_and_surfaces_errors() {
        let (client, transport) = client();
        transport.push(RESTORE_PATH, status(400, r#"{"error": "File missing"}"#));

        let err = client
            .restore_recipes("backup.json", b"[]".to_vec(), true)
            .await
            .unwrap_err();
        assert_eq!(crate::api::error_message(&err), "File missing");

        match &transport.requests()[0].body {
            RequestBody::Multipart(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(parts.contains(&FormPart::Text {
                    name: "overwrite".into(),
                    value: "true".into()
                }));
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_download_file_returns_raw_bytes() {
        let (client, transport) = client();
        transport.push("/media/backup.json", Ok(ApiResponse::new(200, b"[1,2]".to_vec())));

        let bytes = client.download_file("/media/backup.json").await.unwrap();
        assert_eq!(bytes, b"[1,2]");
    }
}
