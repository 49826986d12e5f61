use std::sync::Arc;

use crate::{
    metadata::{
        signatures::{MethodSig, TypeSig},
        token::{table, Token},
    },
    typesystem::{
        ClassId, GenericOwner, GenericParam, ImageId, MethodId, MethodSignature, RuntimeType,
        SigId, TypeId, TypeSystem,
    },
    Error::{InvalidToken, RecursionLimit},
    Result,
};

/// Converts token-based metadata signatures of one image into interned runtime types.
///
/// Generic parameters are tagged with the class and method the resolver was created for;
/// without them they are [`GenericOwner::Unbound`], which is what standalone signatures
/// (`MemberRef`, `TypeSpec`) produce.
pub(crate) struct SignatureResolver<'a> {
    /// The type system classes are loaded into
    ts: &'a TypeSystem,
    /// Image whose tokens the signatures use
    image: ImageId,
    /// Owner of `Var` parameters
    class: Option<ClassId>,
    /// Owner of `MVar` parameters
    method: Option<MethodId>,
}

impl<'a> SignatureResolver<'a> {
    /// Create a new resolver for signatures of `image`
    ///
    /// ## Arguments
    /// * 'ts'    - The type system to load referenced classes into
    /// * 'image' - The image the signature tokens belong to
    pub(crate) fn new(ts: &'a TypeSystem, image: ImageId) -> Self {
        SignatureResolver {
            ts,
            image,
            class: None,
            method: None,
        }
    }

    /// Set the owner of class type parameters
    #[must_use]
    pub(crate) fn with_class(mut self, class: ClassId) -> Self {
        self.class = Some(class);
        self
    }

    /// Set the owner of method type parameters
    #[must_use]
    pub(crate) fn with_method(mut self, method: MethodId) -> Self {
        self.method = Some(method);
        self
    }

    /// Resolve a type signature to an interned type
    ///
    /// # Errors
    /// Returns an error if a referenced class cannot be loaded or the signature nests deeper
    /// than [`crate::LoaderConfig::max_type_depth`].
    pub(crate) fn resolve(&self, signature: &TypeSig) -> Result<TypeId> {
        self.resolve_with_depth(signature, 0)
    }

    /// Resolve a `TypeDef`, `TypeRef` or `TypeSpec` token to an interned type
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] for other tables and any resolution failure.
    pub(crate) fn resolve_token(&self, token: Token) -> Result<TypeId> {
        self.resolve_token_with_depth(token, 0)
    }

    /// Resolve a method signature to an interned signature
    ///
    /// # Errors
    /// Returns an error if a parameter or the return type cannot be resolved.
    pub(crate) fn resolve_method_sig(&self, signature: &MethodSig) -> Result<SigId> {
        self.resolve_method_sig_with_depth(signature, 0)
    }

    fn resolve_token_with_depth(&self, token: Token, depth: usize) -> Result<TypeId> {
        match token.table() {
            table::TYPE_DEF | table::TYPE_REF => {
                let class = self.ts.resolve(self.image, token)?;
                Ok(self.ts.class_type(class))
            }
            table::TYPE_SPEC => {
                let signature = self
                    .ts
                    .live_image(self.image)?
                    .reader()
                    .type_spec(token.row())
                    .ok_or_else(|| malformed_error!("TypeSpec {} is missing", token))?;
                self.resolve_with_depth(&signature, depth + 1)
            }
            _ => Err(InvalidToken(token)),
        }
    }

    fn resolve_method_sig_with_depth(&self, signature: &MethodSig, depth: usize) -> Result<SigId> {
        let ret = self.resolve_with_depth(&signature.ret, depth + 1)?;
        let params = signature
            .params
            .iter()
            .map(|param| self.resolve_with_depth(param, depth + 1))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.ts.types.intern_sig(MethodSignature {
            has_this: signature.has_this,
            explicit_this: signature.explicit_this,
            vararg: signature.vararg,
            generic_param_count: signature.generic_param_count,
            ret,
            params: Arc::from(params),
        }))
    }

    /// Internal recursive resolver with depth tracking
    ///
    /// ## Arguments
    /// * 'signature'   - The signature to resolve
    /// * 'depth'       - Indicator of recursion level
    fn resolve_with_depth(&self, signature: &TypeSig, depth: usize) -> Result<TypeId> {
        let limit = self.ts.config.max_type_depth;
        if depth >= limit {
            return Err(RecursionLimit(limit));
        }

        let ty = match signature {
            TypeSig::Void => RuntimeType::Void,
            TypeSig::Boolean => RuntimeType::Boolean,
            TypeSig::Char => RuntimeType::Char,
            TypeSig::I1 => RuntimeType::I1,
            TypeSig::U1 => RuntimeType::U1,
            TypeSig::I2 => RuntimeType::I2,
            TypeSig::U2 => RuntimeType::U2,
            TypeSig::I4 => RuntimeType::I4,
            TypeSig::U4 => RuntimeType::U4,
            TypeSig::I8 => RuntimeType::I8,
            TypeSig::U8 => RuntimeType::U8,
            TypeSig::R4 => RuntimeType::R4,
            TypeSig::R8 => RuntimeType::R8,
            TypeSig::I => RuntimeType::I,
            TypeSig::U => RuntimeType::U,
            TypeSig::String => RuntimeType::String,
            TypeSig::Object => RuntimeType::Object,
            TypeSig::TypedByRef => RuntimeType::TypedByRef,
            TypeSig::Class(token) | TypeSig::ValueType(token) => {
                return self.resolve_token_with_depth(*token, depth + 1);
            }
            TypeSig::Var(number) => RuntimeType::Var(GenericParam {
                owner: self.class.map_or(GenericOwner::Unbound, GenericOwner::Class),
                number: *number,
            }),
            TypeSig::MVar(number) => RuntimeType::MVar(GenericParam {
                owner: self.method.map_or(GenericOwner::Unbound, GenericOwner::Method),
                number: *number,
            }),
            TypeSig::Ptr(inner) => RuntimeType::Ptr(self.resolve_with_depth(inner, depth + 1)?),
            TypeSig::ByRef(inner) => {
                RuntimeType::ByRef(self.resolve_with_depth(inner, depth + 1)?)
            }
            TypeSig::SzArray(element) => {
                RuntimeType::SzArray(self.resolve_with_depth(element, depth + 1)?)
            }
            TypeSig::Array { element, shape } => RuntimeType::Array {
                element: self.resolve_with_depth(element, depth + 1)?,
                rank: shape.rank,
            },
            TypeSig::GenericInst {
                definition,
                is_value_type,
                args,
            } => {
                let definition = self.ts.resolve(self.image, *definition)?;
                let args = args
                    .iter()
                    .map(|arg| self.resolve_with_depth(arg, depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(self
                    .ts
                    .generic_inst_type(definition, &args, Some(*is_value_type)));
            }
            TypeSig::FnPtr(method) => {
                RuntimeType::FnPtr(self.resolve_method_sig_with_depth(method, depth + 1)?)
            }
        };

        Ok(self.ts.intern(ty))
    }
}
