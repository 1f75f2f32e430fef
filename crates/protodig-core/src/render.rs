//! Rendering of file descriptors as `.proto` source text.
//!
//! The output is deterministic for a given descriptor, which is what lets
//! the dumper detect changes between runs by comparing text.

use crate::error::{Error, Result};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    ServiceDescriptorProto,
};
use std::collections::HashSet;

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: i32 = 536_870_911;

/// Maximum enum value number, the `max` of an enum reserved range
pub const MAX_ENUM_NUMBER: i32 = i32::MAX;

/// Configuration for rendering
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Indentation string (default: 2 spaces)
    pub indent_str: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            indent_str: "  ".to_string(),
        }
    }
}

impl RenderConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation string
    pub fn indent_str(mut self, s: impl Into<String>) -> Self {
        self.indent_str = s.into();
        self
    }
}

/// Proto syntax version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// Proto2 syntax
    Proto2,
    /// Proto3 syntax
    Proto3,
}

impl Syntax {
    /// Returns the syntax declaration string
    pub fn as_str(&self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }
}

impl TryFrom<&str> for Syntax {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "" | "proto2" => Ok(Syntax::Proto2),
            "proto3" => Ok(Syntax::Proto3),
            _ => Err(Error::internal(format!("unsupported proto syntax '{value}'"))),
        }
    }
}

/// Renders a file descriptor as `.proto` text
pub fn render_file(file: &FileDescriptorProto, config: &RenderConfig) -> Result<String> {
    let syntax = Syntax::try_from(file.syntax())?;
    let mut renderer = Renderer {
        out: String::new(),
        indent_str: &config.indent_str,
        depth: 0,
        syntax,
    };
    renderer.file(file);
    Ok(renderer.out)
}

struct Renderer<'a> {
    out: String,
    indent_str: &'a str,
    depth: usize,
    syntax: Syntax,
}

impl Renderer<'_> {
    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str(self.indent_str);
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn open(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }

    fn file(&mut self, file: &FileDescriptorProto) {
        self.line(format!("syntax = \"{}\";", self.syntax.as_str()));
        self.blank();

        if !file.package().is_empty() {
            self.line(format!("package {};", file.package()));
            self.blank();
        }

        self.file_options(file);
        self.imports(file);

        for service in &file.service {
            self.service(service);
            self.blank();
        }
        let groups = group_type_names(&file.extension);
        for message in &file.message_type {
            if groups.contains(message.name()) {
                continue;
            }
            self.message(message);
            self.blank();
        }
        for enum_type in &file.enum_type {
            self.enumeration(enum_type);
            self.blank();
        }
        self.extensions(&file.extension, &file.message_type);
    }

    fn file_options(&mut self, file: &FileDescriptorProto) {
        let Some(opts) = &file.options else {
            return;
        };

        let strings = [
            ("java_package", &opts.java_package),
            ("java_outer_classname", &opts.java_outer_classname),
            ("go_package", &opts.go_package),
            ("objc_class_prefix", &opts.objc_class_prefix),
            ("csharp_namespace", &opts.csharp_namespace),
            ("swift_prefix", &opts.swift_prefix),
            ("php_class_prefix", &opts.php_class_prefix),
            ("php_namespace", &opts.php_namespace),
            ("php_metadata_namespace", &opts.php_metadata_namespace),
            ("ruby_package", &opts.ruby_package),
        ];
        let bools = [
            ("java_multiple_files", opts.java_multiple_files),
            ("java_string_check_utf8", opts.java_string_check_utf8),
            ("cc_enable_arenas", opts.cc_enable_arenas),
            ("deprecated", opts.deprecated),
        ];

        let mut lines = Vec::new();
        for (name, value) in strings {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                lines.push(format!("option {name} = \"{}\";", escape_string(value)));
            }
        }
        for (name, value) in bools {
            if let Some(value) = value {
                lines.push(format!("option {name} = {value};"));
            }
        }
        if let Some(mode) = opts.optimize_for {
            let mode = match mode {
                2 => "CODE_SIZE",
                3 => "LITE_RUNTIME",
                _ => "SPEED",
            };
            lines.push(format!("option optimize_for = {mode};"));
        }

        if !lines.is_empty() {
            for line in lines {
                self.line(line);
            }
            self.blank();
        }
    }

    fn imports(&mut self, file: &FileDescriptorProto) {
        if file.dependency.is_empty() {
            return;
        }

        let public: HashSet<usize> = file.public_dependency.iter().map(|&i| i as usize).collect();
        let weak: HashSet<usize> = file.weak_dependency.iter().map(|&i| i as usize).collect();

        for (i, dep) in file.dependency.iter().enumerate() {
            let modifier = if public.contains(&i) {
                "public "
            } else if weak.contains(&i) {
                "weak "
            } else {
                ""
            };
            self.line(format!("import {modifier}\"{dep}\";"));
        }
        self.blank();
    }

    fn service(&mut self, service: &ServiceDescriptorProto) {
        self.open(format!("service {}", service.name()));
        for method in &service.method {
            let stream = |streaming: bool| if streaming { "stream " } else { "" };
            self.line(format!(
                "rpc {}({}{}) returns ({}{});",
                method.name(),
                stream(method.client_streaming()),
                type_ref(method.input_type()),
                stream(method.server_streaming()),
                type_ref(method.output_type()),
            ));
        }
        self.close();
    }

    fn message(&mut self, message: &DescriptorProto) {
        self.open(format!("message {}", message.name()));
        self.message_body(message);
        self.close();
    }

    /// Everything between the braces of a message or group
    fn message_body(&mut self, message: &DescriptorProto) {
        // Message reserved ranges are end-exclusive
        if let Some(reserved) = reserved_ranges(
            message
                .reserved_range
                .iter()
                .map(|r| (r.start(), r.end().saturating_sub(1))),
            MAX_FIELD_NUMBER,
        ) {
            self.line(reserved);
        }
        if let Some(reserved) = reserved_names(&message.reserved_name) {
            self.line(reserved);
        }

        // Group bodies are written inline with their field
        let mut groups = group_type_names(&message.field);
        groups.extend(group_type_names(&message.extension));

        for nested in &message.nested_type {
            if !is_map_entry(nested) && !groups.contains(nested.name()) {
                self.message(nested);
            }
        }
        for enum_type in &message.enum_type {
            self.enumeration(enum_type);
        }

        // Fields of a real oneof are written inside its block, at the
        // position of the first member.
        let mut written_oneofs = HashSet::new();
        for field in &message.field {
            match real_oneof(field) {
                Some(index) => {
                    if written_oneofs.insert(index) {
                        self.oneof(message, index);
                    }
                }
                None => self.field(field, message),
            }
        }

        for range in &message.extension_range {
            let end = if range.end() == MAX_FIELD_NUMBER + 1 {
                "max".to_string()
            } else {
                range.end().saturating_sub(1).to_string()
            };
            self.line(format!("extensions {} to {};", range.start(), end));
        }

        self.extensions(&message.extension, &message.nested_type);
    }

    fn oneof(&mut self, message: &DescriptorProto, index: i32) {
        let name = message
            .oneof_decl
            .get(index as usize)
            .map_or("", |oneof| oneof.name());
        self.open(format!("oneof {name}"));
        for field in message
            .field
            .iter()
            .filter(|f| real_oneof(f) == Some(index))
        {
            self.member("", field, &message.nested_type);
        }
        self.close();
    }

    fn field(&mut self, field: &FieldDescriptorProto, message: &DescriptorProto) {
        if let Some((key, value)) = map_entry_types(field, message) {
            self.line(format!(
                "map<{}, {}> {} = {}{};",
                key,
                value,
                field.name(),
                field.number(),
                self.field_options(field)
            ));
            return;
        }

        let label = match (field.label(), self.syntax) {
            (Label::Repeated, _) => "repeated ",
            (Label::Required, _) => "required ",
            (Label::Optional, Syntax::Proto2) => "optional ",
            (Label::Optional, Syntax::Proto3) if field.proto3_optional() => "optional ",
            (Label::Optional, Syntax::Proto3) => "",
        };
        self.member(label, field, &message.nested_type);
    }

    /// Writes one field line, or a whole block for a proto2 group
    ///
    /// `scope` holds the messages declared next to the field, where the
    /// group's own message type lives.
    fn member(&mut self, label: &str, field: &FieldDescriptorProto, scope: &[DescriptorProto]) {
        let options = self.field_options(field);

        if let Some(body) = group_body(field, scope) {
            self.open(format!(
                "{}group {} = {}{}",
                label,
                body.name(),
                field.number(),
                options
            ));
            self.message_body(body);
            self.close();
            return;
        }

        self.line(format!(
            "{}{} {} = {}{};",
            label,
            type_name(field),
            field.name(),
            field.number(),
            options
        ));
    }

    fn field_options(&self, field: &FieldDescriptorProto) -> String {
        let mut options = Vec::new();

        if self.syntax == Syntax::Proto2 {
            if let Some(default) = &field.default_value {
                let value = match field.r#type() {
                    Type::String | Type::Bytes => format!("\"{}\"", escape_string(default)),
                    _ => default.clone(),
                };
                options.push(format!("default = {value}"));
            }
        }

        if let Some(json_name) = &field.json_name {
            if *json_name != to_lower_camel_case(field.name()) {
                options.push(format!("json_name = \"{json_name}\""));
            }
        }

        if let Some(opts) = &field.options {
            if let Some(packed) = opts.packed {
                options.push(format!("packed = {packed}"));
            }
            if opts.deprecated() {
                options.push("deprecated = true".to_string());
            }
        }

        if options.is_empty() {
            String::new()
        } else {
            format!(" [{}]", options.join(", "))
        }
    }

    fn enumeration(&mut self, enum_type: &EnumDescriptorProto) {
        self.open(format!("enum {}", enum_type.name()));

        if enum_type
            .options
            .as_ref()
            .is_some_and(|opts| opts.allow_alias())
        {
            self.line("option allow_alias = true;");
        }
        // Enum reserved ranges are inclusive on both ends
        if let Some(reserved) = reserved_ranges(
            enum_type.reserved_range.iter().map(|r| (r.start(), r.end())),
            MAX_ENUM_NUMBER,
        ) {
            self.line(reserved);
        }
        if let Some(reserved) = reserved_names(&enum_type.reserved_name) {
            self.line(reserved);
        }

        for value in &enum_type.value {
            let deprecated = value.options.as_ref().is_some_and(|opts| opts.deprecated());
            self.line(format!(
                "{} = {}{};",
                value.name(),
                value.number(),
                if deprecated { " [deprecated = true]" } else { "" }
            ));
        }

        self.close();
    }

    fn extensions(&mut self, extensions: &[FieldDescriptorProto], scope: &[DescriptorProto]) {
        // Consecutive extensions of the same message share one block
        let mut start = 0;
        while start < extensions.len() {
            let extendee = extensions[start].extendee();
            let len = extensions[start..]
                .iter()
                .take_while(|ext| ext.extendee() == extendee)
                .count();

            self.open(format!("extend {}", type_ref(extendee)));
            for ext in &extensions[start..start + len] {
                let label = match (ext.label(), self.syntax) {
                    (Label::Repeated, _) => "repeated ",
                    (Label::Required, _) => "required ",
                    (Label::Optional, Syntax::Proto2) => "optional ",
                    (Label::Optional, Syntax::Proto3) => "",
                };
                self.member(label, ext, scope);
            }
            self.close();
            self.blank();

            start += len;
        }
    }
}

fn is_map_entry(message: &DescriptorProto) -> bool {
    message
        .options
        .as_ref()
        .is_some_and(|opts| opts.map_entry())
}

/// Index of the oneof a field belongs to, unless it is a synthetic proto3 optional one
fn real_oneof(field: &FieldDescriptorProto) -> Option<i32> {
    if field.proto3_optional() {
        None
    } else {
        field.oneof_index
    }
}

/// Message type of a group field, looked up among its sibling declarations
fn group_body<'a>(
    field: &FieldDescriptorProto,
    scope: &'a [DescriptorProto],
) -> Option<&'a DescriptorProto> {
    if field.r#type() != Type::Group {
        return None;
    }
    let name = field.type_name().rsplit('.').next()?;
    scope.iter().find(|message| message.name() == name)
}

/// Names of the message types backing group fields
fn group_type_names(fields: &[FieldDescriptorProto]) -> HashSet<&str> {
    fields
        .iter()
        .filter(|field| field.r#type() == Type::Group)
        .filter_map(|field| field.type_name().rsplit('.').next())
        .collect()
}

/// Key and value types of a map field, if `field` is one
fn map_entry_types(
    field: &FieldDescriptorProto,
    message: &DescriptorProto,
) -> Option<(String, String)> {
    if field.label() != Label::Repeated || field.r#type() != Type::Message {
        return None;
    }

    let entry_name = field.type_name().rsplit('.').next()?;
    let entry = message
        .nested_type
        .iter()
        .find(|nested| nested.name() == entry_name && is_map_entry(nested))?;

    let key = entry.field.iter().find(|f| f.number() == 1)?;
    let value = entry.field.iter().find(|f| f.number() == 2)?;
    Some((type_name(key), type_name(value)))
}

fn type_name(field: &FieldDescriptorProto) -> String {
    let name = match field.r#type() {
        Type::Double => "double",
        Type::Float => "float",
        Type::Int64 => "int64",
        Type::Uint64 => "uint64",
        Type::Int32 => "int32",
        Type::Fixed64 => "fixed64",
        Type::Fixed32 => "fixed32",
        Type::Bool => "bool",
        Type::String => "string",
        Type::Bytes => "bytes",
        Type::Uint32 => "uint32",
        Type::Sfixed32 => "sfixed32",
        Type::Sfixed64 => "sfixed64",
        Type::Sint32 => "sint32",
        Type::Sint64 => "sint64",
        Type::Group | Type::Message | Type::Enum => {
            return type_ref(field.type_name()).to_string()
        }
    };
    name.to_string()
}

/// Fully-qualified type references are written without the leading dot
fn type_ref(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

/// `ranges` are inclusive; a range reaching `max` is written as `to max`
fn reserved_ranges(ranges: impl Iterator<Item = (i32, i32)>, max: i32) -> Option<String> {
    let parts: Vec<String> = ranges
        .map(|(start, last)| {
            if start == last {
                start.to_string()
            } else if last >= max {
                format!("{start} to max")
            } else {
                format!("{start} to {last}")
            }
        })
        .collect();

    (!parts.is_empty()).then(|| format!("reserved {};", parts.join(", ")))
}

fn reserved_names(names: &[String]) -> Option<String> {
    let parts: Vec<String> = names
        .iter()
        .map(|name| format!("\"{}\"", escape_string(name)))
        .collect();

    (!parts.is_empty()).then(|| format!("reserved {};", parts.join(", ")))
}

/// Escape a string for proto syntax
fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ if c.is_ascii_control() => {
                result.push_str(&format!("\\x{:02x}", c as u8));
            }
            _ => result.push(c),
        }
    }
    result
}

/// Convert a snake_case name to lowerCamelCase
fn to_lower_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}
