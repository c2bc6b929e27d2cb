//! Shared utilities for cachemark procedural macros
//!
//! This crate provides the attribute parsing and code generation used by the
//! `#[memoize]` and `#[method]` macros of `cachemark-macros`.

use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{punctuated::Punctuated, Expr, FnArg, Ident, Lit, MetaNameValue, Pat, ReturnType, Token, Type};

/// Which macro is being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `#[memoize]`: keyed on the raw call arguments.
    Function,
    /// `#[method]`: keyed on dependent attributes of `self`.
    Method,
}

/// Parsed macro attributes
#[derive(Debug)]
pub struct MemoizeAttributes {
    pub prefix: Option<String>,
    pub reference: TokenStream2,
    pub clock: Option<syn::Path>,
    pub deltas: Vec<(Ident, i64)>,
    pub refresh: bool,
    pub populate: bool,
    pub store: Option<Expr>,
    pub no_default_delta: bool,
    pub attributes: Vec<String>,
}

impl Default for MemoizeAttributes {
    fn default() -> Self {
        Self {
            prefix: None,
            reference: quote! { ::cachemark_core::ReferencePolicy::None },
            clock: None,
            deltas: Vec::new(),
            refresh: false,
            populate: true,
            store: None,
            no_default_delta: false,
            attributes: Vec::new(),
        }
    }
}

impl MemoizeAttributes {
    /// Defaults for `mode`: method mode scopes entries to the bound entity.
    pub fn for_mode(mode: Mode) -> Self {
        let mut attrs = Self::default();
        if mode == Mode::Method {
            attrs.reference = quote! { ::cachemark_core::ReferencePolicy::Bound };
        }
        attrs
    }
}

fn error(msg: &str) -> TokenStream2 {
    quote! { compile_error!(#msg) }
}

fn lit_of(nv: &MetaNameValue) -> Option<&Lit> {
    match &nv.value {
        Expr::Lit(expr_lit) => Some(&expr_lit.lit),
        _ => None,
    }
}

fn is_true(nv: &MetaNameValue) -> bool {
    matches!(lit_of(nv), Some(Lit::Bool(b)) if b.value)
}

/// Parse a string attribute such as `prefix = "reports"`
pub fn parse_str_attribute(nv: &MetaNameValue, name: &str) -> Result<String, TokenStream2> {
    match lit_of(nv) {
        Some(Lit::Str(s)) => Ok(s.value()),
        _ => Err(error(&format!(
            "Invalid syntax for `{name}`: expected `{name} = \"...\"`"
        ))),
    }
}

/// Parse a boolean attribute such as `refresh = true`
pub fn parse_bool_attribute(nv: &MetaNameValue, name: &str) -> Result<bool, TokenStream2> {
    match lit_of(nv) {
        Some(Lit::Bool(b)) => Ok(b.value),
        _ => Err(error(&format!(
            "Invalid syntax for `{name}`: expected `{name} = true|false`"
        ))),
    }
}

/// Parse an integer attribute such as `minutes = 5` or `hours = -1`
pub fn parse_int_attribute(nv: &MetaNameValue, name: &str) -> Result<i64, TokenStream2> {
    let invalid = || {
        error(&format!(
            "Invalid syntax for `{name}`: expected `{name} = <integer>`"
        ))
    };

    let (negative, lit) = match &nv.value {
        Expr::Lit(expr_lit) => (false, &expr_lit.lit),
        Expr::Unary(unary) if matches!(unary.op, syn::UnOp::Neg(_)) => match &*unary.expr {
            Expr::Lit(expr_lit) => (true, &expr_lit.lit),
            _ => return Err(invalid()),
        },
        _ => return Err(invalid()),
    };

    match lit {
        Lit::Int(lit_int) => {
            let val = lit_int.base10_parse::<i64>().map_err(|_| invalid())?;
            Ok(if negative { -val } else { val })
        }
        _ => Err(invalid()),
    }
}

/// Parse the `reference` attribute: `true`, `false` or a fixed id string
pub fn parse_reference_attribute(nv: &MetaNameValue) -> Result<TokenStream2, TokenStream2> {
    match lit_of(nv) {
        Some(Lit::Bool(b)) if b.value => Ok(quote! { ::cachemark_core::ReferencePolicy::Bound }),
        Some(Lit::Bool(_)) => Ok(quote! { ::cachemark_core::ReferencePolicy::None }),
        Some(Lit::Str(s)) => {
            let id = s.value();
            Ok(quote! {
                ::cachemark_core::ReferencePolicy::Explicit(::cachemark_core::Reference::new(#id))
            })
        }
        _ => Err(error(
            "Invalid syntax for `reference`: expected `reference = true|false|\"id\"`",
        )),
    }
}

/// Parse the `expires` attribute: the path of a `fn() -> DateTime<Utc>` clock
pub fn parse_clock_attribute(nv: &MetaNameValue) -> Result<syn::Path, TokenStream2> {
    let path = parse_str_attribute(nv, "expires")?;
    syn::parse_str::<syn::Path>(&path)
        .map_err(|_| error("Invalid `expires`: expected the path of a clock function"))
}

/// Parse the `store` attribute: an expression yielding an `Arc` of a store
pub fn parse_store_attribute(nv: &MetaNameValue) -> Result<Expr, TokenStream2> {
    let expr = parse_str_attribute(nv, "store")?;
    syn::parse_str::<Expr>(&expr).map_err(|_| error("Invalid `store`: expected an expression"))
}

/// Parse the `attributes` attribute: `attributes = ["a", "b.c"]`
pub fn parse_attributes_attribute(nv: &MetaNameValue) -> Result<Vec<String>, TokenStream2> {
    let invalid =
        || error("Invalid syntax for `attributes`: expected `attributes = [\"path\", ...]`");

    let Expr::Array(array) = &nv.value else {
        return Err(invalid());
    };

    array
        .elems
        .iter()
        .map(|elem| match elem {
            Expr::Lit(expr_lit) => match &expr_lit.lit {
                Lit::Str(s) => Ok(s.value()),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        })
        .collect()
}

/// Parse memoization attributes from a token stream
pub fn parse_memoize_attributes(
    attr: TokenStream2,
    mode: Mode,
) -> Result<MemoizeAttributes, TokenStream2> {
    use syn::parse::Parser;

    let parser = Punctuated::<MetaNameValue, Token![,]>::parse_terminated;
    let parsed_args = parser.parse2(attr).map_err(|e| {
        let msg = format!("Failed to parse attributes: {}", e);
        quote! { compile_error!(#msg) }
    })?;

    let mut attrs = MemoizeAttributes::for_mode(mode);

    for nv in parsed_args {
        let Some(ident) = nv.path.get_ident().cloned() else {
            return Err(error("Invalid attribute name"));
        };

        match ident.to_string().as_str() {
            "prefix" => attrs.prefix = Some(parse_str_attribute(&nv, "prefix")?),
            "reference" if mode == Mode::Function && is_true(&nv) => {
                return Err(error(
                    "`reference = true` needs a bound entity; use #[method] or `reference = \"id\"`",
                ))
            }
            "reference" => attrs.reference = parse_reference_attribute(&nv)?,
            "expires" => attrs.clock = Some(parse_clock_attribute(&nv)?),
            name @ ("weeks" | "days" | "hours" | "minutes" | "seconds") => {
                let val = parse_int_attribute(&nv, name)?;
                attrs.deltas.push((ident, val));
            }
            "refresh" => attrs.refresh = parse_bool_attribute(&nv, "refresh")?,
            "populate" => attrs.populate = parse_bool_attribute(&nv, "populate")?,
            "store" => attrs.store = Some(parse_store_attribute(&nv)?),
            "no_default_delta" => {
                attrs.no_default_delta = parse_bool_attribute(&nv, "no_default_delta")?
            }
            "attributes" if mode == Mode::Method => {
                attrs.attributes = parse_attributes_attribute(&nv)?
            }
            "attributes" => {
                return Err(error(
                    "`attributes` is only supported by #[method]; use #[method(attributes = [...])]",
                ))
            }
            other => {
                let msg = format!("Unknown memoization attribute `{other}`");
                return Err(quote! { compile_error!(#msg) });
            }
        }
    }

    Ok(attrs)
}

/// Generate the `Memoize` configuration expression
pub fn generate_config_expr(attrs: &MemoizeAttributes) -> TokenStream2 {
    let reference = &attrs.reference;
    let mut calls = vec![quote! { .reference(#reference) }];

    if let Some(prefix) = &attrs.prefix {
        calls.push(quote! { .prefix(#prefix) });
    }
    if !attrs.attributes.is_empty() {
        let paths = &attrs.attributes;
        calls.push(quote! { .attributes([#(#paths),*]) });
    }
    if let Some(clock) = &attrs.clock {
        calls.push(quote! { .clock(#clock) });
    }
    for (unit, val) in &attrs.deltas {
        calls.push(quote! { .#unit(#val) });
    }
    if attrs.no_default_delta {
        calls.push(quote! { .without_default_delta() });
    }

    let refresh = attrs.refresh;
    let populate = attrs.populate;
    calls.push(quote! { .refresh(#refresh).populate(#populate) });

    quote! {
        ::cachemark_core::Memoize::new() #(#calls)*
    }
}

/// Generate the statements binding `__store` to a `&dyn CacheStore`
pub fn generate_store_binding(attrs: &MemoizeAttributes) -> TokenStream2 {
    let handle = match &attrs.store {
        Some(expr) => quote! { #expr },
        None => quote! { ::cachemark_core::default_store() },
    };

    quote! {
        let __store_handle = #handle;
        let __store: &dyn ::cachemark_core::CacheStore = &*__store_handle;
    }
}

/// Generate the statements collecting the call arguments into `__args`
pub fn generate_arguments(push_self: bool, arg_idents: &[Ident]) -> TokenStream2 {
    let receiver = push_self.then(|| quote! { __args.push(&self)?; });
    quote! {
        let mut __args = ::cachemark_core::Arguments::new();
        #receiver
        #(
            __args.push(&#arg_idents)?;
        )*
    }
}

/// Identifiers of the typed arguments, rejecting destructuring patterns
pub fn argument_idents<'a, I>(inputs: I) -> Result<Vec<Ident>, TokenStream2>
where
    I: IntoIterator<Item = &'a FnArg>,
{
    inputs
        .into_iter()
        .filter_map(|arg| match arg {
            FnArg::Receiver(_) => None,
            FnArg::Typed(pat_type) => Some(pat_type),
        })
        .map(|pat_type| match &*pat_type.pat {
            Pat::Ident(pat_ident) => Ok(pat_ident.ident.clone()),
            _ => Err(error(
                "memoized functions take plain identifier arguments; destructure inside the body",
            )),
        })
        .collect()
}

/// True when the declared return type is a `Result<..>` (or an alias named `Result`)
pub fn returns_result(output: &ReturnType) -> bool {
    match output {
        ReturnType::Type(_, ty) => match &**ty {
            Type::Path(type_path) => type_path
                .path
                .segments
                .last()
                .map(|segment| segment.ident == "Result")
                .unwrap_or(false),
            _ => false,
        },
        ReturnType::Default => false,
    }
}
