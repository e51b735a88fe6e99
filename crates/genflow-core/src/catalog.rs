//! Built-in flows and the operations composed from them.
//!
//! ```text
//! logo ──────────────► logo-set (fan-out ×3)
//! product-description ─┬──► product-details (composite)
//! product-specification┤
//! product-image (×3) ──┤
//! product-tagline ─────┘   (after description)
//! background-color
//! ```
//!
//! [`registry`] is the process-wide set of these definitions, built on first
//! use and never mutated afterwards.

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

use crate::backend::GenerationOptions;
use crate::composer::{Composer, SubTask, TaskOutputs};
use crate::config::ConfigError;
use crate::error::FlowError;
use crate::fanout::{fan_out, numbered, FanOutPolicy};
use crate::flow::{FlowDefinition, FlowExecutor, FlowRegistry, FlowRegistryBuilder, OutputSpec};
use crate::prompt::Template;
use crate::schema::{self, FieldSpec, Format, ItemSpec, Shape};

pub const TEXT_MODEL: &str = "gemini-2.0-flash";
pub const IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";

pub const LOGO: &str = "logo";
pub const LOGO_SET: &str = "logo-set";
pub const PRODUCT_DESCRIPTION: &str = "product-description";
pub const PRODUCT_SPECIFICATION: &str = "product-specification";
pub const PRODUCT_IMAGE: &str = "product-image";
pub const PRODUCT_TAGLINE: &str = "product-tagline";
pub const PRODUCT_DETAILS: &str = "product-details";
pub const BACKGROUND_COLOR: &str = "background-color";

/// Number of logos in a logo set.
pub const LOGO_VARIANTS: usize = 3;
/// Number of images generated for product details.
pub const PRODUCT_IMAGE_VARIANTS: usize = 3;

static REGISTRY: Lazy<FlowRegistry> = Lazy::new(|| match builtin_registry() {
    Ok(registry) => registry,
    Err(e) => panic!("built-in flows failed to register: {}", e),
});

/// The process-wide registry of built-in flows.
///
/// # Panics
///
/// On first use, if a built-in definition is invalid. [`builtin_registry`]
/// is the fallible equivalent.
pub fn registry() -> &'static FlowRegistry {
    &REGISTRY
}

/// A builder pre-loaded with the built-in flows, for callers that add their
/// own definitions.
pub fn builder() -> Result<FlowRegistryBuilder, ConfigError> {
    Ok(definitions()?
        .into_iter()
        .fold(FlowRegistry::builder(), |builder, flow| builder.register(flow)))
}

pub fn builtin_registry() -> Result<FlowRegistry, ConfigError> {
    builder()?.build()
}

/// Every built-in flow definition.
pub fn definitions() -> Result<Vec<FlowDefinition>, ConfigError> {
    Ok(vec![
        logo()?,
        product_description()?,
        product_specification()?,
        product_image()?,
        product_tagline()?,
        background_color()?,
    ])
}

fn template(flow: &str, source: &str) -> Result<Template, ConfigError> {
    Template::parse(source)
        .map_err(|e| ConfigError::Invalid(format!("template of flow '{}': {}", flow, e)))
}

fn image_options() -> GenerationOptions {
    GenerationOptions {
        response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
        ..GenerationOptions::default()
    }
}

fn product_input() -> Shape {
    Shape::new()
        .field(FieldSpec::string("productName").required().format(Format::NonEmpty))
        .field(FieldSpec::array("features", ItemSpec::string()).describe("Key selling points"))
        .field(
            FieldSpec::string("image")
                .format(Format::DataUri)
                .describe("Reference photo of the product"),
        )
}

pub fn logo() -> Result<FlowDefinition, ConfigError> {
    let input = Shape::new()
        .field(FieldSpec::string("concept").required().format(Format::NonEmpty))
        .field(FieldSpec::string("style"))
        .field(FieldSpec::string("colors"))
        .field(FieldSpec::integer("variation"));
    let source = "Design a clean, modern logo for: {{concept}}.\
        {{#if style}} Style: {{style}}.{{/if}}\
        {{#if colors}} Use these colors: {{colors}}.{{/if}}\
        {{#if variation}} This is variation {{variation}}; \
        make it clearly distinct from other variations.{{/if}} \
        Return a single logo image on a plain background with no extra text.";

    Ok(FlowDefinition::new(
        LOGO,
        IMAGE_MODEL,
        input,
        OutputSpec::media("logo"),
        template(LOGO, source)?,
    )
    .describe("Generate one logo image for a concept")
    .options(image_options()))
}

pub fn product_description() -> Result<FlowDefinition, ConfigError> {
    let source = "{{#if image}}{{media image}}{{/if}}\
        Write a compelling product description for {{productName}}.\
        {{#if features}} Key features: {{features}}.{{/if}}\
        {{#if image}} Use the attached photo for visual details.{{/if}} \
        Keep it to two short paragraphs of plain text.";

    Ok(FlowDefinition::new(
        PRODUCT_DESCRIPTION,
        TEXT_MODEL,
        product_input(),
        OutputSpec::text("description"),
        template(PRODUCT_DESCRIPTION, source)?,
    )
    .describe("Marketing description of a product"))
}

pub fn product_specification() -> Result<FlowDefinition, ConfigError> {
    let output = Shape::new().field(
        FieldSpec::array(
            "specifications",
            ItemSpec::object(
                Shape::new()
                    .field(FieldSpec::string("name").required().format(Format::NonEmpty))
                    .field(FieldSpec::string("value").required()),
            ),
        )
        .required(),
    );
    let source = "{{#if image}}{{media image}}{{/if}}\
        List the technical specifications of {{productName}}.\
        {{#if features}} Known features: {{features}}.{{/if}} \
        Respond with JSON only, in the form \
        {\"specifications\": [{\"name\": \"...\", \"value\": \"...\"}]}.";

    Ok(FlowDefinition::new(
        PRODUCT_SPECIFICATION,
        TEXT_MODEL,
        product_input(),
        OutputSpec::json(output),
        template(PRODUCT_SPECIFICATION, source)?,
    )
    .describe("Structured name/value specifications of a product")
    .options(GenerationOptions {
        temperature: Some(0.2),
        ..GenerationOptions::default()
    }))
}

pub fn product_image() -> Result<FlowDefinition, ConfigError> {
    let input = Shape::new()
        .field(FieldSpec::string("productName").required().format(Format::NonEmpty))
        .field(FieldSpec::string("image").format(Format::DataUri))
        .field(FieldSpec::integer("variation"));
    let source = "{{#if image}}{{media image}}{{/if}}\
        Create a professional product photo of {{productName}} on a clean studio background.\
        {{#if image}} Keep the product identical to the attached photo.{{/if}}\
        {{#if variation}} This is shot {{variation}}; \
        use a different angle than the other shots.{{/if}}";

    Ok(FlowDefinition::new(
        PRODUCT_IMAGE,
        IMAGE_MODEL,
        input,
        OutputSpec::media("image"),
        template(PRODUCT_IMAGE, source)?,
    )
    .describe("Studio-style product photo")
    .options(image_options()))
}

pub fn product_tagline() -> Result<FlowDefinition, ConfigError> {
    let input = Shape::new()
        .field(FieldSpec::string("productName").required().format(Format::NonEmpty))
        .field(FieldSpec::string("description").required().format(Format::NonEmpty));
    let source = "Product: {{productName}}\nDescription: {{description}}\n\
        Write one catchy marketing tagline of at most ten words. Reply with the tagline only.";

    Ok(FlowDefinition::new(
        PRODUCT_TAGLINE,
        TEXT_MODEL,
        input,
        OutputSpec::text("tagline"),
        template(PRODUCT_TAGLINE, source)?,
    )
    .describe("Short tagline derived from a product description")
    .options(GenerationOptions {
        temperature: Some(0.9),
        ..GenerationOptions::default()
    }))
}

pub fn background_color() -> Result<FlowDefinition, ConfigError> {
    let input = Shape::new()
        .field(FieldSpec::string("image").required().format(Format::DataUri))
        .field(FieldSpec::string("backgroundColor").required().format(Format::HexColor));
    let source = "{{media image}}Replace the background of this image with the solid color \
        {{backgroundColor}}. Keep the foreground subject unchanged.";

    Ok(FlowDefinition::new(
        BACKGROUND_COLOR,
        IMAGE_MODEL,
        input,
        OutputSpec::media("image"),
        template(BACKGROUND_COLOR, source)?,
    )
    .describe("Recolor the background of an image")
    .options(image_options()))
}

fn lookup(name: &str) -> Result<Arc<FlowDefinition>, FlowError> {
    registry()
        .get(name)
        .ok_or_else(|| FlowError::invalid_input(name, "flow", format!("unknown flow '{}'", name)))
}

/// Copy the listed fields of `input`, skipping absent ones.
fn project(input: &Value, fields: &[&str]) -> Value {
    let mut out = Map::new();
    for field in fields {
        if let Some(value) = input.get(*field).filter(|v| !v.is_null()) {
            out.insert(field.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

fn take_field(value: Value, field: &str) -> Value {
    match value {
        Value::Object(mut map) => map.remove(field).unwrap_or(Value::Null),
        other => other,
    }
}

/// Generate [`LOGO_VARIANTS`] logos for one concept: `{ "logos": [...] }`.
///
/// Either every logo is produced or the whole set fails.
pub async fn generate_logo_set(
    executor: &FlowExecutor,
    input: Value,
    policy: FanOutPolicy,
) -> Result<Value, FlowError> {
    let flow = lookup(LOGO)?;
    let input =
        schema::validate(&flow.input, &input).map_err(|source| FlowError::InputValidation {
            flow: LOGO_SET.to_string(),
            source,
        })?;

    let logos =
        fan_out(executor, flow, input, LOGO_VARIANTS, policy, numbered("variation")).await?;
    let logos: Vec<Value> = logos.into_iter().map(|v| take_field(v, "logo")).collect();
    Ok(json!({ "logos": logos }))
}

/// Description (required), specification, images and tagline for a product.
///
/// Optional parts that fail are reported as unavailable entries.
pub async fn generate_product_details(
    executor: &FlowExecutor,
    input: Value,
    policy: FanOutPolicy,
) -> Result<Value, FlowError> {
    let description = lookup(PRODUCT_DESCRIPTION)?;
    let specification = lookup(PRODUCT_SPECIFICATION)?;
    let image = lookup(PRODUCT_IMAGE)?;
    let tagline = lookup(PRODUCT_TAGLINE)?;

    let input = schema::validate(&description.input, &input).map_err(|source| {
        FlowError::InputValidation {
            flow: PRODUCT_DETAILS.to_string(),
            source,
        }
    })?;

    let description_task = {
        let (executor, flow, input) = (executor.clone(), description, input.clone());
        SubTask::required("description", move |_| {
            let (executor, flow, input) = (executor.clone(), flow.clone(), input.clone());
            async move { Ok(take_field(executor.run(&flow, input).await?, "description")) }
        })
    };

    let specification_task = {
        let (executor, flow, input) = (executor.clone(), specification, input.clone());
        SubTask::optional("specification", move |_| {
            let (executor, flow, input) = (executor.clone(), flow.clone(), input.clone());
            async move { Ok(take_field(executor.run(&flow, input).await?, "specifications")) }
        })
    };

    let images_task = {
        let executor = executor.clone();
        let base = project(&input, &["productName", "image"]);
        SubTask::optional("images", move |_| {
            let (executor, flow, base) = (executor.clone(), image.clone(), base.clone());
            async move {
                let images = fan_out(
                    &executor,
                    flow,
                    base,
                    PRODUCT_IMAGE_VARIANTS,
                    policy,
                    numbered("variation"),
                )
                .await?;
                Ok(Value::Array(images.into_iter().map(|v| take_field(v, "image")).collect()))
            }
        })
    };

    let tagline_task = {
        let executor = executor.clone();
        let product_name = input.get("productName").cloned().unwrap_or(Value::Null);
        SubTask::optional("tagline", move |deps: TaskOutputs| {
            let (executor, flow) = (executor.clone(), tagline.clone());
            let input = json!({
                "productName": product_name.clone(),
                "description": deps.get("description").cloned().unwrap_or(Value::Null),
            });
            async move { Ok(take_field(executor.run(&flow, input).await?, "tagline")) }
        })
        .after(&["description"])
    };

    let result = Composer::new(PRODUCT_DETAILS)
        .task(description_task)
        .task(specification_task)
        .task(images_task)
        .task(tagline_task)
        .run()
        .await?;

    if !result.unavailable().is_empty() {
        tracing::info!(
            "[Catalog] '{}' finished without: {}",
            PRODUCT_DETAILS,
            result.unavailable().join(", ")
        );
    }
    Ok(result.to_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, Scripted, ScriptedBackend};
    use crate::error::ErrorKind;
    use std::time::Duration;

    const PIXEL: &str = "data:image/png;base64,iVBORw0KGgo=";

    #[test]
    fn test_builtin_registry_is_complete() {
        let built = builtin_registry().unwrap();
        assert_eq!(
            built.names(),
            vec![
                BACKGROUND_COLOR,
                LOGO,
                PRODUCT_DESCRIPTION,
                PRODUCT_IMAGE,
                PRODUCT_SPECIFICATION,
                PRODUCT_TAGLINE,
            ]
        );
        assert_eq!(registry().names(), built.names());
    }

    #[test]
    fn test_image_flows_request_image_modality() {
        let flow = registry().get(BACKGROUND_COLOR).unwrap();
        assert_eq!(flow.model, IMAGE_MODEL);
        let options = flow.options.as_ref().unwrap();
        assert!(options.response_modalities.contains(&"IMAGE".to_string()));
    }

    #[test]
    fn test_project_keeps_listed_fields() {
        let input = json!({ "productName": "Mug", "features": ["Ceramic"], "image": null });
        assert_eq!(project(&input, &["productName", "image"]), json!({ "productName": "Mug" }));
    }

    #[tokio::test]
    async fn test_logo_prompt_mentions_variation() {
        let backend = Arc::new(ScriptedBackend::always(Scripted::media(PIXEL)));
        let exec = FlowExecutor::new(backend.clone(), Duration::from_secs(5));

        let input = json!({ "concept": "coffee shop", "style": "minimal" });
        let output = generate_logo_set(&exec, input, FanOutPolicy::WaitAll).await.unwrap();
        assert_eq!(output["logos"].as_array().unwrap().len(), LOGO_VARIANTS);

        let mut prompts: Vec<String> = backend.requests().iter().map(|r| r.prompt_text()).collect();
        prompts.sort();
        assert!(prompts[0].contains("Style: minimal."));
        assert!(prompts[0].contains("variation 1;"));
        assert!(prompts[2].contains("variation 3;"));
    }

    #[tokio::test]
    async fn test_logo_set_rejects_bad_input_once() {
        let backend = Arc::new(ScriptedBackend::always(Scripted::media(PIXEL)));
        let exec = FlowExecutor::new(backend.clone(), Duration::from_secs(5));

        let err = generate_logo_set(&exec, json!({ "style": "retro" }), FanOutPolicy::WaitAll)
            .await
            .unwrap_err();
        match err {
            FlowError::InputValidation { flow, source } => {
                assert_eq!(flow, LOGO_SET);
                assert_eq!(source.reason_for("concept"), Some("required field is missing"));
            }
            other => panic!("expected input validation error, got {:?}", other),
        }
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_product_details_happy_path() {
        let backend = Arc::new(ScriptedBackend::from_fn(|_, request| {
            let prompt = request.prompt_text();
            match request.backend.as_str() {
                IMAGE_MODEL => Scripted::media(PIXEL),
                _ if prompt.contains("technical specifications") => Scripted::Json(json!({
                    "specifications": [{ "name": "Capacity", "value": "350ml" }]
                })),
                _ if prompt.contains("tagline") => Scripted::text("Sip in style."),
                _ => Scripted::text("A sturdy ceramic mug."),
            }
        }));
        let exec = FlowExecutor::new(backend.clone(), Duration::from_secs(5));

        let output = generate_product_details(
            &exec,
            json!({ "productName": "Mug", "features": ["Ceramic", "350ml"] }),
            FanOutPolicy::WaitAll,
        )
        .await
        .unwrap();

        assert_eq!(output["description"], "A sturdy ceramic mug.");
        assert_eq!(output["specification"][0]["name"], "Capacity");
        assert_eq!(output["images"].as_array().unwrap().len(), PRODUCT_IMAGE_VARIANTS);
        assert_eq!(output["tagline"], "Sip in style.");
        assert_eq!(backend.call_count(), 6);

        let tagline_request = backend
            .requests()
            .into_iter()
            .find(|r| r.prompt_text().contains("tagline"))
            .unwrap();
        assert!(tagline_request.prompt_text().contains("Description: A sturdy ceramic mug."));
    }

    #[tokio::test]
    async fn test_product_details_image_failure_degrades() {
        let backend = Arc::new(ScriptedBackend::from_fn(|_, request| {
            match request.backend.as_str() {
                IMAGE_MODEL => Scripted::Fail(BackendError::Quota("quota exceeded".to_string())),
                _ if request.prompt_text().contains("technical specifications") => {
                    Scripted::Json(json!({
                        "specifications": [{ "name": "Material", "value": "Ceramic" }]
                    }))
                }
                _ => Scripted::text("Plain text"),
            }
        }));
        let exec = FlowExecutor::new(backend, Duration::from_secs(5));

        let input = json!({ "productName": "Mug" });
        let output = generate_product_details(&exec, input, FanOutPolicy::WaitAll)
            .await
            .unwrap();
        assert_eq!(output["description"], "Plain text");
        assert_eq!(output["images"]["status"], "unavailable");
        assert_eq!(output["images"]["kind"], ErrorKind::Aggregate.as_str());
    }
}
