use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, FnArg, ItemFn, Receiver, ReturnType};

// Import shared utilities
use cachemark_macro_utils::{
    argument_idents, generate_arguments, generate_config_expr, generate_store_binding,
    parse_memoize_attributes, returns_result, Mode,
};

fn error(msg: &str) -> TokenStream {
    TokenStream::from(quote! { compile_error!(#msg); })
}

fn receiver_of(input: &ItemFn) -> Option<&Receiver> {
    input.sig.inputs.iter().find_map(|arg| match arg {
        FnArg::Receiver(receiver) => Some(receiver),
        FnArg::Typed(_) => None,
    })
}

/// Generate the expression resolving the canonical name of the annotated item
fn generate_name_expr(fn_name: &str, has_self: bool) -> TokenStream2 {
    if has_self {
        quote! { ::cachemark_core::CanonicalName::method::<Self>(module_path!(), #fn_name) }
    } else {
        quote! { ::cachemark_core::CanonicalName::function(module_path!(), #fn_name) }
    }
}

/// Generate `<name>_uncached`: the original body without any store interaction
fn generate_uncached(input: &ItemFn) -> TokenStream2 {
    let mut sig = input.sig.clone();
    sig.ident = format_ident!("{}_uncached", input.sig.ident);

    let cfg_attrs = input.attrs.iter().filter(|attr| attr.path().is_ident("cfg"));
    let doc = format!("Runs `{}` without consulting the cache.", input.sig.ident);
    let vis = &input.vis;
    let block = &input.block;

    quote! {
        #(#cfg_attrs)*
        #[doc = #doc]
        #[allow(dead_code)]
        #vis #sig #block
    }
}

fn expand(mode: Mode, attr: TokenStream, input: ItemFn) -> TokenStream {
    let attrs = match parse_memoize_attributes(attr.into(), mode) {
        Ok(attrs) => attrs,
        Err(err) => return TokenStream::from(err),
    };

    let fn_attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;

    if sig.asyncness.is_some() {
        return error("memoized functions must be synchronous");
    }
    if !returns_result(&sig.output) {
        return error(
            "memoized functions must return `Result<T, E>` where `E: From<cachemark::CacheError>`",
        );
    }
    let ret_type = match &sig.output {
        ReturnType::Type(_, ty) => quote! { #ty },
        ReturnType::Default => quote! { () },
    };

    let receiver = receiver_of(&input);
    if mode == Mode::Method {
        match receiver {
            Some(r) if r.reference.is_some() && r.mutability.is_none() && r.colon_token.is_none() => {}
            _ => return error("#[method] requires a `&self` receiver"),
        }
    }

    let arg_idents = match argument_idents(&sig.inputs) {
        Ok(idents) => idents,
        Err(err) => return TokenStream::from(err),
    };

    let fn_name = sig.ident.to_string();
    let name_expr = generate_name_expr(&fn_name, receiver.is_some());
    let config_expr = generate_config_expr(&attrs);
    let store_binding = generate_store_binding(&attrs);
    let arguments = generate_arguments(mode == Mode::Function && receiver.is_some(), &arg_idents);

    let call = match mode {
        Mode::Function => quote! {
            __CACHEMARK_CONFIG.execute(__store, __name, &__args, || -> #ret_type #block)
        },
        Mode::Method => quote! {
            __CACHEMARK_CONFIG.execute_method(__store, __name, self, &__args, || -> #ret_type #block)
        },
    };

    let uncached = generate_uncached(&input);

    let expanded = quote! {
        #uncached

        #(#fn_attrs)*
        #vis #sig {
            static __CACHEMARK_NAME: ::cachemark_core::once_cell::sync::OnceCell<::cachemark_core::CanonicalName> =
                ::cachemark_core::once_cell::sync::OnceCell::new();
            static __CACHEMARK_CONFIG: ::cachemark_core::once_cell::sync::Lazy<::cachemark_core::Memoize> =
                ::cachemark_core::once_cell::sync::Lazy::new(|| #config_expr);

            let __name = || {
                __CACHEMARK_NAME
                    .get_or_try_init(|| #name_expr)
                    .map(::std::clone::Clone::clone)
            };
            #store_binding
            #[allow(unused_mut)]
            #arguments

            #call
        }
    };

    TokenStream::from(expanded)
}

/// Memoizes a function's `Ok` results in a persistent, expiring [`CacheStore`].
///
/// The result is stored under a key made of the function's canonical name
/// (`module::path:function`, or `module::path:Type.method` for methods) and
/// a SHA-256 digest of the serialized arguments. A `self` receiver counts as
/// the first argument.
///
/// Next to the memoized function the macro emits `<name>_uncached`, with the
/// same signature, which always runs the body and never reads or writes the
/// store. Recursive calls inside the body still go through the cache.
///
/// # Requirements
///
/// - **Return type**: `Result<T, E>` with `T: Serialize + DeserializeOwned` and
///   `E: From<CacheError>`. `Err` values are returned as-is and never cached.
/// - **Arguments**: plain identifiers of `Serialize` types.
/// - The crate using the macro depends on `cachemark-core`.
///
/// # Macro Parameters
///
/// - `prefix = "..."`: key prefix to use instead of the canonical name.
/// - `reference = false | "id"`: scope entries to nothing or to a fixed id.
///   Default: `false`. Scoping to a bound entity is what [`macro@method`] does.
/// - `weeks`, `days`, `hours`, `minutes`, `seconds = N`: lifetime of new
///   records; components add up. Default: one week.
/// - `no_default_delta = true`: without explicit components, records expire
///   immediately instead of after a week.
/// - `expires = "path::to::clock"`: a `fn() -> DateTime<Utc>` used as "now".
/// - `refresh = true`: push the expiry forward on every hit.
/// - `populate = false`: fail with `CacheError::CacheMiss` instead of
///   computing on a miss.
/// - `store = "expr"`: expression yielding an `Arc` of a [`CacheStore`].
///   Default: the process-wide default store.
///
/// # Examples
///
/// ```ignore
/// use cachemark::{memoize, CacheError};
///
/// #[memoize(minutes = 5)]
/// fn exchange_rate(from: &str, to: &str) -> Result<f64, CacheError> {
///     Ok(query_rates_service(from, to))
/// }
///
/// // Computed once, then answered from the store for five minutes.
/// let rate = exchange_rate("EUR", "USD")?;
/// ```
///
/// ## Custom Store and Prefix
///
/// ```ignore
/// use cachemark::{memoize, CacheError, MemoryStore};
/// use once_cell::sync::Lazy;
/// use std::sync::Arc;
///
/// static STORE: Lazy<Arc<MemoryStore>> = Lazy::new(|| Arc::new(MemoryStore::new()));
///
/// #[memoize(store = "STORE.clone()", prefix = "reports:v2", refresh = true)]
/// fn monthly_report(month: u32) -> Result<Vec<u64>, CacheError> {
///     Ok(build_report(month))
/// }
/// ```
///
/// [`CacheStore`]: ../cachemark_core/store/trait.CacheStore.html
#[proc_macro_attribute]
pub fn memoize(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    expand(Mode::Function, attr, input)
}

/// Memoizes a method of an [`Entity`] keyed on the entity's dependent attributes.
///
/// Records are scoped to the entity's durable id (`reference` defaults to
/// `true`) and keyed on the values found at the `attributes` paths of the
/// serialized entity, followed by the remaining arguments. Changing one of
/// those attributes re-keys the call; changing anything else does not.
///
/// While the entity is unsaved, or caching is vetoed for its type through
/// [`veto`], the body runs without touching the store.
///
/// Like [`macro@memoize`], emits a `<name>_uncached` sibling method.
///
/// Accepts every parameter of [`macro@memoize`] plus
/// `attributes = ["path", "nested.path"]`, and `reference = true` (the
/// default) scopes entries to the entity. The receiver must be `&self` and
/// `Self: Entity + Serialize`.
///
/// # Examples
///
/// ```ignore
/// use cachemark::{method, CacheError, Entity, Reference};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Invoice {
///     id: Option<u64>,
///     lines: Vec<u64>,
///     note: String,
/// }
///
/// impl Entity for Invoice {
///     fn reference(&self) -> Option<Reference> {
///         self.id.map(Reference::from)
///     }
/// }
///
/// impl Invoice {
///     #[method(attributes = ["lines"], hours = 1)]
///     fn total(&self) -> Result<u64, CacheError> {
///         Ok(self.lines.iter().sum())
///     }
/// }
/// ```
///
/// [`Entity`]: ../cachemark_core/trait.Entity.html
/// [`veto`]: ../cachemark_core/veto/index.html
#[proc_macro_attribute]
pub fn method(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    expand(Mode::Method, attr, input)
}
