use crate::typesystem::{GenericOwner, RuntimeType, SigId, TypeId, TypeSystem};

/// How strictly two method signatures must agree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigMatch {
    /// The interned signatures are identical
    Exact,
    /// Generic parameters match by position: the owner of a method parameter is ignored,
    /// and a class parameter without a known owner matches any class parameter
    IgnoreGenericOwner,
}

impl TypeSystem {
    /// Compares two method signatures.
    ///
    /// Class identity is never relaxed: `List<T>` and `Queue<T>` differ under every mode.
    #[must_use]
    pub fn signatures_match(&self, a: SigId, b: SigId, mode: SigMatch) -> bool {
        if a == b {
            return true;
        }
        if mode == SigMatch::Exact {
            return false;
        }

        let (left, right) = (self.types.sig(a), self.types.sig(b));
        left.has_this == right.has_this
            && left.explicit_this == right.explicit_this
            && left.vararg == right.vararg
            && left.generic_param_count == right.generic_param_count
            && left.params.len() == right.params.len()
            && self.types_match(left.ret, right.ret)
            && left
                .params
                .iter()
                .zip(right.params.iter())
                .all(|(l, r)| self.types_match(*l, *r))
    }

    fn types_match(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        match (self.types.get(a), self.types.get(b)) {
            (RuntimeType::Var(l), RuntimeType::Var(r)) => {
                l.number == r.number
                    && (l.owner == r.owner
                        || l.owner == GenericOwner::Unbound
                        || r.owner == GenericOwner::Unbound)
            }
            (RuntimeType::MVar(l), RuntimeType::MVar(r)) => l.number == r.number,
            (RuntimeType::Ptr(l), RuntimeType::Ptr(r))
            | (RuntimeType::ByRef(l), RuntimeType::ByRef(r))
            | (RuntimeType::SzArray(l), RuntimeType::SzArray(r)) => self.types_match(l, r),
            (
                RuntimeType::Array {
                    element: l,
                    rank: left_rank,
                },
                RuntimeType::Array {
                    element: r,
                    rank: right_rank,
                },
            ) => left_rank == right_rank && self.types_match(l, r),
            (
                RuntimeType::GenericInst {
                    definition: l,
                    args: left_args,
                    ..
                },
                RuntimeType::GenericInst {
                    definition: r,
                    args: right_args,
                    ..
                },
            ) => {
                let (left_args, right_args) =
                    (self.types.inst(left_args).args, self.types.inst(right_args).args);
                l == r
                    && left_args.len() == right_args.len()
                    && left_args
                        .iter()
                        .zip(right_args.iter())
                        .all(|(l, r)| self.types_match(*l, *r))
            }
            (RuntimeType::FnPtr(l), RuntimeType::FnPtr(r)) => {
                self.signatures_match(l, r, SigMatch::IgnoreGenericOwner)
            }
            _ => false,
        }
    }
}
