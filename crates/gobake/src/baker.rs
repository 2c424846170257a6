//! The bake pipeline: run to the break, snapshot, rewrite.

use std::collections::BTreeSet;

use gobake_host::{GoRuntime, HostCall};
use gobake_types::Module;

use crate::error::BakeResult;
use crate::glue::glue_code;
use crate::options::BakeOptions;
use crate::rewrite;
use crate::runner::{run_until_break, BreakInfo};
use crate::snapshot;

/// Bakes modules with a fixed set of invocation inputs.
#[derive(Debug, Clone, Default)]
pub struct Baker {
    options: BakeOptions,
}

/// A rewritten module and what it took to produce it.
#[derive(Debug, Clone)]
pub struct Baked {
    pub module: Module,
    /// Value-bridge calls the glue must replay before resuming.
    pub calls: Vec<HostCall>,
    /// Instructions the original module executed before `main.main`.
    pub instruction_count: u64,
    /// Names of the initializers that were emptied.
    pub inits_cleared: BTreeSet<String>,
    /// Call preambles folded into `_preCall`.
    pub folded_pre_calls: usize,
}

impl Baker {
    pub fn new(options: BakeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BakeOptions {
        &self.options
    }

    /// Run `module` to `main.main` and rewrite it to resume there.
    pub fn bake(&self, module: Module) -> BakeResult<Baked> {
        self.bake_with_runtime(module, GoRuntime::new())
    }

    /// [`Baker::bake`] with a caller-supplied host, e.g. to capture the
    /// program's stderr.
    pub fn bake_with_runtime(&self, module: Module, runtime: GoRuntime) -> BakeResult<Baked> {
        let info = run_until_break(module, &self.options, runtime)?;
        Ok(self.bake_with_info(info))
    }

    /// Rewrite the module captured in `info`.
    pub fn bake_with_info(&self, info: BreakInfo) -> Baked {
        let BreakInfo {
            instance,
            calls,
            inits_invoked,
            resume_marker,
            instruction_count,
            ..
        } = info;
        let mut module = instance.module().clone();
        snapshot::bake_globals(&mut module, instance.globals(), resume_marker);
        let memory = instance.memory();
        snapshot::bake_data(&mut module, memory.bytes(), memory.size_pages());
        rewrite::neuter_initializers(&mut module, &inits_invoked);
        rewrite::inline_host_calls(&mut module, &calls);
        rewrite::prune_locals(&mut module);
        let folded_pre_calls = rewrite::fold_pre_calls(&mut module);

        let inits_cleared: BTreeSet<String> = inits_invoked
            .iter()
            .filter_map(|index| module.func_name(*index).map(str::to_string))
            .collect();
        tracing::debug!(target: "gobake::baker", ?inits_cleared, folded_pre_calls, "rewrote module");
        Baked {
            module,
            calls,
            instruction_count,
            inits_cleared,
            folded_pre_calls,
        }
    }
}

impl Baked {
    /// JavaScript to run before `go.run` so the value table matches the
    /// snapshot.
    pub fn glue(&self) -> String {
        glue_code(&self.calls)
    }

    /// The rewritten module as validated bytes.
    pub fn encode(&self) -> BakeResult<Vec<u8>> {
        Ok(gobake_codec::encode(&self.module)?)
    }
}
