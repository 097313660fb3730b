use tacmesh_core::choice::Chooser;
use tacmesh_core::document::RoutineDoc;
use tacmesh_core::il::Routine;
use tacmesh_transform::budget::MeshBudget;
use tacmesh_transform::mesh::Mesh;
use tacmesh_transform::pass::{DefaultPass, Pass};
use tacmesh_transform::{MeshConfig, Transform};

use crate::common::{ROUTINE, SINGLE_JUMP, assert_edge_symmetry, function, routine};

#[test]
fn test_export_reingests_unchanged() {
    let original = routine(ROUTINE);
    let doc = original.to_document();
    let json = doc.to_json().unwrap();

    let again = Routine::from_json(&json).unwrap();
    assert_eq!(again.to_document(), doc);
    for (before, after) in original.functions.iter().zip(&again.functions) {
        assert_eq!(before.id, after.id);
        assert_eq!(before.block_count(), after.block_count());
        assert_eq!(before.edge_count(), after.edge_count());
        assert_eq!(before.instruction_count(), after.instruction_count());
        assert_eq!(before.variables(), after.variables());
    }
}

#[test]
fn test_conditional_successors_are_true_first() {
    let routine = routine(ROUTINE);
    let doc = routine.to_document();
    let main = doc
        .functions
        .iter()
        .find(|f| f.external_label == "main")
        .unwrap();
    let b1 = &main.basic_blocks[1];
    let b4 = &main.basic_blocks[3];
    assert_eq!(b1.successors, format!("{} {}", b4.id, main.basic_blocks[2].id));
    assert!(b1.predecessors.contains(&main.basic_blocks[0].id.to_string()));
}

#[test]
fn test_meshed_export_reingests() {
    let mut routine = routine(SINGLE_JUMP);
    let transforms: Vec<Box<dyn Transform>> = vec![Box::new(Mesh::new(MeshConfig::default()))];
    let mut chooser = Chooser::from_u64(7);
    DefaultPass
        .run(
            &mut routine.functions[0],
            &transforms,
            &mut chooser,
            &MeshBudget::unlimited(),
        )
        .unwrap();
    let meshed = &routine.functions[0];
    assert!(meshed.block_count() > 2);

    let json = routine.to_document().to_json().unwrap();
    let doc = RoutineDoc::from_json(&json).unwrap();
    assert!(doc.functions[0].basic_blocks.iter().any(|b| b.dead));
    assert!(
        doc.functions[0]
            .basic_blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .any(|i| i.poly_required)
    );
    // no fake local existed, so meshing added a single guard
    assert_eq!(doc.functions[0].locals.fake.len(), 1);

    let again = Routine::from_document(&doc).unwrap();
    let reread = function(&again, "single");
    assert_eq!(reread.block_count(), meshed.block_count());
    assert_eq!(reread.edge_count(), meshed.edge_count());
    assert_edge_symmetry(reread);
}
