//! Administrative block form
//!
//! The form is plain data: the server serializes it for admin clients and
//! validates submissions against it. Field constraints (options, numeric
//! bounds and step, colour syntax, file extension) are enforced here and
//! nowhere else.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::block::AssetStorage;
use crate::color::Rgb;
use crate::config::{AnimationMode, BlockConfig, CameraType, ConfigError, FileId, MaterialMode};

/// Where uploaded models are stored
pub const UPLOAD_LOCATION: &str = "public://cad_render_files/";
/// The only accepted upload extension
pub const MODEL_EXTENSION: &str = "glb";
/// Default maximum length of a textfield
pub const TEXTFIELD_MAX_LENGTH: usize = 128;

const ILLEGAL_CHOICE: &str = "An illegal choice has been detected. Please contact the site administrator.";

/// A choice of a radios element
#[derive(Debug, Clone, Serialize)]
pub struct FormOption {
    pub value: String,
    pub label: String,
}

impl FormOption {
    fn new(value: &str, label: &str) -> Self {
        Self {
            value: value.to_string(),
            label: label.to_string(),
        }
    }
}

/// One element of the form tree
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormElement {
    ManagedFile {
        name: String,
        title: String,
        description: String,
        upload_location: String,
        extensions: Vec<String>,
        default_value: Vec<FileId>,
    },
    Radios {
        name: String,
        title: String,
        options: Vec<FormOption>,
        default_value: String,
    },
    /// Collapsible group; submitted values are nested under its name
    Details {
        name: String,
        title: String,
        open: bool,
        children: Vec<FormElement>,
    },
    Number {
        name: String,
        title: String,
        description: Option<String>,
        min: Option<f64>,
        max: Option<f64>,
        step: f64,
        default_value: f64,
    },
    Textfield {
        name: String,
        title: String,
        description: Option<String>,
        placeholder: Option<String>,
        required: bool,
        max_length: usize,
        default_value: String,
    },
    Color {
        name: String,
        title: String,
        default_value: String,
    },
    Checkbox {
        name: String,
        title: String,
        default_value: bool,
    },
}

impl FormElement {
    pub fn name(&self) -> &str {
        match self {
            Self::ManagedFile { name, .. }
            | Self::Radios { name, .. }
            | Self::Details { name, .. }
            | Self::Number { name, .. }
            | Self::Textfield { name, .. }
            | Self::Color { name, .. }
            | Self::Checkbox { name, .. } => name,
        }
    }
}

/// The block configuration form
#[derive(Debug, Clone, Serialize)]
pub struct Form {
    pub elements: Vec<FormElement>,
}

/// Raw submitted values, nested by group name like the form tree
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct FormSubmission(pub Map<String, Value>);

/// Submitted values that passed validation, flattened by element name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedSubmission {
    values: Map<String, Value>,
}

/// Validation errors keyed by element path (`group][element`)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormErrors {
    pub errors: BTreeMap<String, String>,
}

impl fmt::Display for FormErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|(path, message)| format!("{path}: {message}"))
            .collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for FormErrors {}

impl Form {
    /// Build the form with defaults taken from the current configuration
    pub fn for_config(config: &BlockConfig) -> Self {
        let options = &config.options;

        let radios = |name: &str, title: &str, choices: Vec<FormOption>, default: &str| FormElement::Radios {
            name: name.to_string(),
            title: title.to_string(),
            options: choices,
            default_value: default.to_string(),
        };

        let elements = vec![
            FormElement::Textfield {
                name: "label".to_string(),
                title: "Title".to_string(),
                description: None,
                placeholder: None,
                required: true,
                max_length: 255,
                default_value: config.label.clone(),
            },
            FormElement::Checkbox {
                name: "label_display".to_string(),
                title: "Display title".to_string(),
                default_value: config.label_display,
            },
            FormElement::ManagedFile {
                name: "cad_render_file".to_string(),
                title: "CAD File".to_string(),
                description: "Provide a CAD model to display in this block.".to_string(),
                upload_location: UPLOAD_LOCATION.to_string(),
                extensions: vec![MODEL_EXTENSION.to_string()],
                default_value: config.cad_render_file.clone(),
            },
            radios(
                "animation",
                "Animation",
                AnimationMode::ALL
                    .iter()
                    .map(|m| FormOption::new(m.as_str(), m.label()))
                    .collect(),
                options.animation.as_str(),
            ),
            FormElement::Details {
                name: "camera".to_string(),
                title: "Camera".to_string(),
                open: false,
                children: vec![
                    radios(
                        "camera_type",
                        "Camera Type",
                        CameraType::ALL
                            .iter()
                            .map(|c| FormOption::new(c.as_str(), c.label()))
                            .collect(),
                        options.camera_type.as_str(),
                    ),
                    FormElement::Number {
                        name: "camera_zoom".to_string(),
                        title: "Zoom".to_string(),
                        description: Some("Camera zoom, default value is 1.".to_string()),
                        min: Some(0.0),
                        max: None,
                        step: 0.01,
                        default_value: options.camera_zoom as f64,
                    },
                ],
            },
            FormElement::Details {
                name: "dimensions".to_string(),
                title: "Dimensions".to_string(),
                open: false,
                children: vec![
                    FormElement::Textfield {
                        name: "width".to_string(),
                        title: "Width".to_string(),
                        description: Some("Leave blank to use container width.".to_string()),
                        placeholder: None,
                        required: false,
                        max_length: TEXTFIELD_MAX_LENGTH,
                        default_value: options.width.clone(),
                    },
                    FormElement::Textfield {
                        name: "height".to_string(),
                        title: "Height".to_string(),
                        description: Some("Leave blank to use container height.".to_string()),
                        placeholder: None,
                        required: false,
                        max_length: TEXTFIELD_MAX_LENGTH,
                        default_value: options.height.clone(),
                    },
                ],
            },
            FormElement::Details {
                name: "render_options".to_string(),
                title: "Render Options".to_string(),
                open: false,
                children: vec![
                    FormElement::Textfield {
                        name: "background_color".to_string(),
                        title: "Background Color".to_string(),
                        description: Some(
                            "Provide hex color code like 0xffffff. Leave blank for transparent background."
                                .to_string(),
                        ),
                        placeholder: Some("0xffffff".to_string()),
                        required: false,
                        max_length: TEXTFIELD_MAX_LENGTH,
                        default_value: options.background_color.clone(),
                    },
                    radios(
                        "material",
                        "Material",
                        MaterialMode::ALL
                            .iter()
                            .map(|m| FormOption::new(m.as_str(), m.label()))
                            .collect(),
                        options.material.as_str(),
                    ),
                    FormElement::Color {
                        name: "solid_color".to_string(),
                        title: "Solid Color".to_string(),
                        default_value: options.solid_color.clone(),
                    },
                    FormElement::Checkbox {
                        name: "transparency".to_string(),
                        title: "Enable Transparency".to_string(),
                        default_value: options.transparency,
                    },
                    FormElement::Number {
                        name: "opacity".to_string(),
                        title: "Opacity".to_string(),
                        description: Some("Set the opacity level (0 to 1).".to_string()),
                        min: Some(0.0),
                        max: Some(1.0),
                        step: 0.1,
                        default_value: options.opacity as f64,
                    },
                    FormElement::Checkbox {
                        name: "wireframe".to_string(),
                        title: "Enable Wireframe".to_string(),
                        default_value: options.wireframe,
                    },
                ],
            },
        ];

        Self { elements }
    }

    /// Validate a submission against the element constraints.
    ///
    /// Elements missing from the submission keep their default value.
    pub fn validate<S>(&self, submission: &FormSubmission, storage: &S) -> Result<ValidatedSubmission, FormErrors>
    where
        S: AssetStorage + ?Sized,
    {
        let mut validated = ValidatedSubmission::default();
        let mut errors = FormErrors::default();
        validate_elements(&self.elements, &submission.0, "", storage, &mut validated, &mut errors);

        if errors.errors.is_empty() {
            Ok(validated)
        } else {
            Err(errors)
        }
    }
}

fn validate_elements<S>(
    elements: &[FormElement],
    values: &Map<String, Value>,
    prefix: &str,
    storage: &S,
    validated: &mut ValidatedSubmission,
    errors: &mut FormErrors,
) where
    S: AssetStorage + ?Sized,
{
    for element in elements {
        let name = element.name();
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}][{name}")
        };
        let submitted = values.get(name).filter(|v| !v.is_null());

        if let FormElement::Details { children, .. } = element {
            let empty = Map::new();
            let nested = submitted.and_then(Value::as_object).unwrap_or(&empty);
            validate_elements(children, nested, &path, storage, validated, errors);
            continue;
        }

        match validate_element(element, submitted, storage) {
            Ok(value) => {
                validated.values.insert(name.to_string(), value);
            }
            Err(message) => {
                errors.errors.insert(path, message);
            }
        }
    }
}

fn validate_element<S>(element: &FormElement, submitted: Option<&Value>, storage: &S) -> Result<Value, String>
where
    S: AssetStorage + ?Sized,
{
    match element {
        FormElement::ManagedFile { default_value, .. } => {
            let Some(value) = submitted else {
                return Ok(serde_json::to_value(default_value).unwrap_or_default());
            };
            let fids = parse_file_ids(value).ok_or_else(|| "Invalid file reference.".to_string())?;
            if fids.len() > 1 {
                return Err("Only one file can be uploaded.".to_string());
            }
            if let Some(missing) = fids.iter().find(|fid| !storage.contains(**fid)) {
                return Err(format!("The file {missing} does not exist."));
            }
            Ok(Value::Array(fids.into_iter().map(|fid| Value::from(fid.0)).collect()))
        }
        FormElement::Radios {
            options,
            default_value,
            ..
        } => {
            let Some(value) = submitted else {
                return Ok(Value::String(default_value.clone()));
            };
            match value.as_str() {
                Some(choice) if options.iter().any(|o| o.value == choice) => Ok(Value::String(choice.to_string())),
                _ => Err(ILLEGAL_CHOICE.to_string()),
            }
        }
        FormElement::Number {
            title,
            min,
            max,
            step,
            default_value,
            ..
        } => {
            let number = match submitted {
                None => *default_value,
                Some(Value::String(s)) if s.trim().is_empty() => *default_value,
                Some(value) => parse_number(value).ok_or_else(|| format!("{title} must be a number."))?,
            };
            if let Some(min) = min {
                if number < *min {
                    return Err(format!("{title} must be higher than or equal to {min}."));
                }
            }
            if let Some(max) = max {
                if number > *max {
                    return Err(format!("{title} must be lower than or equal to {max}."));
                }
            }
            if !is_on_step(number, min.unwrap_or(0.0), *step) {
                return Err(format!("{title} is not a valid number."));
            }
            Ok(Value::from(number))
        }
        FormElement::Textfield {
            title,
            required,
            max_length,
            default_value,
            ..
        } => {
            let text = match submitted {
                None => default_value.clone(),
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(_) => return Err(format!("{title} must be text.")),
            };
            if *required && text.trim().is_empty() {
                return Err(format!("{title} field is required."));
            }
            let length = text.chars().count();
            if length > *max_length {
                return Err(format!(
                    "{title} cannot be longer than {max_length} characters but is currently {length} characters long."
                ));
            }
            Ok(Value::String(text))
        }
        FormElement::Color { title, default_value, .. } => {
            let Some(value) = submitted else {
                return Ok(Value::String(default_value.clone()));
            };
            value
                .as_str()
                .filter(|s| s.trim_start().starts_with('#'))
                .and_then(Rgb::parse_hex)
                .map(|color| Value::String(color.to_css_hex()))
                .ok_or_else(|| format!("{title} must be a valid color."))
        }
        FormElement::Checkbox { title, default_value, .. } => {
            let Some(value) = submitted else {
                return Ok(Value::Bool(*default_value));
            };
            parse_checkbox(value)
                .map(Value::Bool)
                .ok_or_else(|| format!("{title} must be checked or unchecked."))
        }
        FormElement::Details { .. } => Ok(Value::Null),
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn parse_file_ids(value: &Value) -> Option<Vec<FileId>> {
    let parse_one = |v: &Value| match v {
        Value::Number(n) => n.as_u64().map(FileId),
        Value::String(s) => s.trim().parse::<u64>().ok().map(FileId),
        _ => None,
    };
    match value {
        Value::Array(items) => items.iter().map(parse_one).collect(),
        other => parse_one(other).map(|fid| vec![fid]),
    }
}

fn parse_checkbox(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().filter(|n| *n <= 1).map(|n| n == 1),
        Value::String(s) => match s.as_str() {
            "1" | "on" | "true" => Some(true),
            "0" | "" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Whether `value` lies on the grid `offset + k * step`
fn is_on_step(value: f64, offset: f64, step: f64) -> bool {
    if step <= 0.0 {
        return true;
    }
    let steps = (value - offset) / step;
    (steps - steps.round()).abs() < 1e-6
}

impl ValidatedSubmission {
    /// Validated value of an element by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// File ids of the managed file element
    pub fn file_ids(&self) -> Vec<FileId> {
        self.values
            .get("cad_render_file")
            .and_then(parse_file_ids)
            .unwrap_or_default()
    }

    /// Apply the values over an existing configuration
    pub fn apply_to(&self, config: &BlockConfig) -> Result<BlockConfig, ConfigError> {
        let mut merged = match serde_json::to_value(config)? {
            Value::Object(map) => map,
            _ => return Err(ConfigError::NotAnObject),
        };
        for (key, value) in &self.values {
            merged.insert(key.clone(), value.clone());
        }
        BlockConfig::merged(Value::Object(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::StorageError;
    use serde_json::json;

    struct KnownFiles(Vec<u64>);

    impl AssetStorage for KnownFiles {
        fn contains(&self, fid: FileId) -> bool {
            self.0.contains(&fid.0)
        }

        fn make_permanent(&mut self, fid: FileId) -> Result<(), StorageError> {
            if self.contains(fid) {
                Ok(())
            } else {
                Err(StorageError::NotFound(fid))
            }
        }

        fn public_url(&self, fid: FileId) -> Option<String> {
            self.contains(fid).then(|| format!("/files/{fid}.glb"))
        }
    }

    fn submit(value: Value) -> Result<ValidatedSubmission, FormErrors> {
        let form = Form::for_config(&BlockConfig::default());
        let submission: FormSubmission = serde_json::from_value(value).unwrap();
        form.validate(&submission, &KnownFiles(vec![1, 2]))
    }

    #[test]
    fn test_form_layout() {
        let form = Form::for_config(&BlockConfig::default());
        let names: Vec<&str> = form.elements.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            ["label", "label_display", "cad_render_file", "animation", "camera", "dimensions", "render_options"]
        );

        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["elements"][2]["type"], "managed_file");
        assert_eq!(json["elements"][2]["extensions"], json!(["glb"]));
        assert_eq!(json["elements"][4]["children"][1]["step"], 0.01);
    }

    #[test]
    fn test_full_submission() {
        let validated = submit(json!({
            "cad_render_file": [2],
            "animation": "rotate_on_hover",
            "camera": {"camera_type": "orthographic", "camera_zoom": "1.25"},
            "dimensions": {"width": "800", "height": ""},
            "render_options": {
                "background_color": "0xffffff",
                "material": "solid_color",
                "solid_color": "#F00",
                "transparency": "1",
                "opacity": 0.5,
                "wireframe": true
            }
        }))
        .unwrap();

        let config = validated.apply_to(&BlockConfig::default()).unwrap();
        assert_eq!(config.cad_render_file, vec![FileId(2)]);
        assert_eq!(config.options.animation, AnimationMode::RotateOnHover);
        assert_eq!(config.options.camera_type, CameraType::Orthographic);
        assert_eq!(config.options.camera_zoom, 1.25);
        assert_eq!(config.options.width, "800");
        assert_eq!(config.options.solid_color, "#ff0000");
        assert!(config.options.transparency);
        assert_eq!(config.options.opacity, 0.5);
        assert!(config.options.wireframe);
    }

    #[test]
    fn test_missing_values_keep_defaults() {
        let config = submit(json!({})).unwrap().apply_to(&BlockConfig::default()).unwrap();
        assert_eq!(config, BlockConfig::default());
    }

    #[test]
    fn test_numeric_constraints() {
        let errors = submit(json!({
            "camera": {"camera_zoom": -1},
            "render_options": {"opacity": 0.25}
        }))
        .unwrap_err();
        assert!(errors.errors.contains_key("camera][camera_zoom"));
        assert!(errors.errors["render_options][opacity"].contains("not a valid number"));

        let errors = submit(json!({"render_options": {"opacity": "1.5"}})).unwrap_err();
        assert!(errors.errors["render_options][opacity"].contains("lower than or equal"));

        let errors = submit(json!({"camera": {"camera_zoom": "abc"}})).unwrap_err();
        assert!(errors.errors["camera][camera_zoom"].contains("must be a number"));

        assert!(submit(json!({"camera": {"camera_zoom": 0.07}, "render_options": {"opacity": 0.3}})).is_ok());
    }

    #[test]
    fn test_illegal_choices() {
        let errors = submit(json!({"animation": "spin", "render_options": {"material": 3}})).unwrap_err();
        assert_eq!(errors.errors["animation"], ILLEGAL_CHOICE);
        assert!(errors.errors.contains_key("render_options][material"));
    }

    #[test]
    fn test_file_references() {
        assert!(submit(json!({"cad_render_file": 1})).is_ok());
        assert!(submit(json!({"cad_render_file": []})).unwrap().file_ids().is_empty());

        let errors = submit(json!({"cad_render_file": [9]})).unwrap_err();
        assert!(errors.errors["cad_render_file"].contains("does not exist"));

        let errors = submit(json!({"cad_render_file": [1, 2]})).unwrap_err();
        assert!(errors.errors.contains_key("cad_render_file"));
    }

    #[test]
    fn test_text_and_color() {
        let long = "x".repeat(TEXTFIELD_MAX_LENGTH + 1);
        let errors = submit(json!({
            "label": " ",
            "dimensions": {"width": long},
            "render_options": {"solid_color": "0xff0000"}
        }))
        .unwrap_err();
        assert!(errors.errors["label"].contains("required"));
        assert!(errors.errors["dimensions][width"].contains("cannot be longer"));
        assert!(errors.errors["render_options][solid_color"].contains("valid color"));
    }

    #[test]
    fn test_color_requires_hash() {
        for color in ["ff0000", "f00", "red"] {
            let errors = submit(json!({"render_options": {"solid_color": color}})).unwrap_err();
            assert!(errors.errors.contains_key("render_options][solid_color"), "accepted {color}");
        }
    }
}
