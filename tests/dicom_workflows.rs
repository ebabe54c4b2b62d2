//
// dicom_workflows.rs
// Dicom-Editor-rs
//
// Integration-style tests covering scripted anonymization, batch naming, preamble clearing,
// PatientID assignment, VR repair, and manual element edits on real Part-10 files.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{open_file, FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use dicom_editor::anonymize::{anonymize, AnonymizeOptions, AnonymizeStatus, Anonymizer};
use dicom_editor::batch::{self, FileFilter, Operation, RenamePolicy};
use dicom_editor::dicom_access::ElementAccess;
use dicom_editor::integer_table::IntegerTable;
use dicom_editor::lookup::LookupTable;
use dicom_editor::models::FileStatus;
use dicom_editor::properties::Properties;
use dicom_editor::script::expr::hash_value;
use dicom_editor::script::{self, CompiledScript};
use dicom_editor::{elements, fix_vr, patient_id, preamble, EditorError};
use tempfile::tempdir;

const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
const PRIVATE_CREATOR: Tag = Tag(0x0009, 0x0010);
const PRIVATE_VALUE: Tag = Tag(0x0009, 0x1001);
const SOP_UID: &str = "1.2.826.0.1.3680043.2.1125.1";

fn write_test_dicom(path: &Path, patient_name: &str, patient_id: &str) {
    // Tiny Secondary Capture instance with one private block and native pixels.
    let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    obj.put(DataElement::new(
        PATIENT_NAME,
        VR::PN,
        PrimitiveValue::from(patient_name),
    ));
    obj.put(DataElement::new(
        PATIENT_ID,
        VR::LO,
        PrimitiveValue::from(patient_id),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0020),
        VR::DA,
        PrimitiveValue::from("20240110"),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0060),
        VR::CS,
        PrimitiveValue::from("OT"),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0016),
        VR::UI,
        PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.7"),
    ));
    obj.put(DataElement::new(
        SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(SOP_UID),
    ));
    obj.put(DataElement::new(
        PRIVATE_CREATOR,
        VR::LO,
        PrimitiveValue::from("ACME 1.0"),
    ));
    obj.put(DataElement::new(
        PRIVATE_VALUE,
        VR::LO,
        PrimitiveValue::from("secret"),
    ));
    obj.put(DataElement::new(
        Tag(0x0028, 0x0010),
        VR::US,
        PrimitiveValue::from(2_u16),
    )); // Rows
    obj.put(DataElement::new(
        Tag(0x0028, 0x0011),
        VR::US,
        PrimitiveValue::from(2_u16),
    )); // Columns
    obj.put(DataElement::new(
        Tag(0x0028, 0x0002),
        VR::US,
        PrimitiveValue::from(1_u16),
    ));
    obj.put(DataElement::new(
        Tag(0x0028, 0x0100),
        VR::US,
        PrimitiveValue::from(8_u16),
    ));
    obj.put(DataElement::new(
        Tag(0x0028, 0x0101),
        VR::US,
        PrimitiveValue::from(8_u16),
    ));
    obj.put(DataElement::new(
        Tag(0x0028, 0x0102),
        VR::US,
        PrimitiveValue::from(7_u16),
    ));
    obj.put(DataElement::new(
        Tag(0x0028, 0x0103),
        VR::US,
        PrimitiveValue::from(0_u16),
    ));
    obj.put(DataElement::new(
        Tag(0x0028, 0x0004),
        VR::CS,
        PrimitiveValue::from("MONOCHROME2"),
    ));
    obj.put(DataElement::new(
        Tag(0x7fe0, 0x0010),
        VR::OB,
        PrimitiveValue::from(vec![0, 64, 128, 255]),
    ));

    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
        .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.7")
        .media_storage_sop_instance_uid(SOP_UID)
        .build()
        .expect("meta");

    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for elem in obj {
        file_obj.put(elem);
    }
    file_obj.write_to_file(path).expect("write test dicom");
}

fn write_script(dir: &Path, directives: &str) -> PathBuf {
    let path = dir.join("dicom-anonymizer.script");
    std::fs::write(&path, format!("<script>\n{directives}\n</script>\n")).expect("script");
    path
}

fn compile(path: &Path) -> CompiledScript {
    CompiledScript::compile(&script::load(path).expect("load script")).expect("compile")
}

fn value(path: &Path, tag: Tag) -> Option<String> {
    open_file(path).expect("reopen").element_str(tag)
}

#[test]
fn anonymize_empties_hashes_and_drops_private_groups() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("scan.dcm");
    let output = dir.path().join("scan-no-phi.dcm");
    write_test_dicom(&input, "DOE^JOHN", "12345");
    let script = compile(&write_script(
        dir.path(),
        r#" <e en="T" t="00100010" n="PatientName">@empty()</e>
 <e en="T" t="00100020" n="PatientID">@hash(this,8)</e>
 <r en="T" t="privategroups">Remove private groups</r>"#,
    ));

    let status = anonymize(
        &input,
        &output,
        &script,
        &LookupTable::default(),
        None,
        AnonymizeOptions::default(),
    )
    .expect("anonymize");
    assert_eq!(
        status,
        AnonymizeStatus::Ok {
            output: output.clone()
        }
    );

    let obj = open_file(&output).expect("open output");
    assert_eq!(obj.element_str(PATIENT_NAME).as_deref(), Some(""));
    let id = obj.element_str(PATIENT_ID).expect("PatientID");
    assert_eq!(id.len(), 8);
    assert_eq!(id, hash_value("12345", 8));
    assert!(obj.tags().all(|t| t.group() % 2 == 0));

    let bytes = std::fs::read(&output).expect("read output");
    assert_eq!(&bytes[128..132], b"DICM");
    // The source file is untouched.
    assert_eq!(value(&input, PATIENT_NAME).as_deref(), Some("DOE^JOHN"));
}

#[test]
fn hash_is_stable_across_runs() {
    let dir = tempdir().expect("tempdir");
    let script = compile(&write_script(
        dir.path(),
        r#" <e en="T" t="00100020">@hash(this,12)</e>"#,
    ));
    let mut ids = Vec::new();
    for name in ["a.dcm", "b.dcm"] {
        let path = dir.path().join(name);
        write_test_dicom(&path, "DOE^JANE", "ABC-1");
        anonymize(
            &path,
            &path,
            &script,
            &LookupTable::default(),
            None,
            AnonymizeOptions::default(),
        )
        .expect("anonymize");
        ids.push(value(&path, PATIENT_ID).expect("id"));
    }
    assert_eq!(ids[0], ids[1]);
}

#[test]
fn set_patient_ids_uses_first_directory_level() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("root");
    let a = root.join("PtA").join("s1").join("a.dcm");
    let b = root.join("PtB").join("s2").join("b.dcm");
    let c = root.join("c.dcm");
    for path in [&a, &b, &c] {
        std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        write_test_dicom(path, "DOE^JOHN", "ORIGINAL");
    }

    let report = patient_id::set_patient_ids(&root, &FileFilter::accept_all());
    assert_eq!(report.status_of(&a), Some(FileStatus::Ok));
    assert_eq!(report.status_of(&b), Some(FileStatus::Ok));
    assert_eq!(value(&a, PATIENT_ID).as_deref(), Some("PtA"));
    assert_eq!(value(&b, PATIENT_ID).as_deref(), Some("PtB"));

    let base = report
        .results
        .iter()
        .find(|r| r.path == c)
        .expect("c.dcm reported");
    assert_eq!(
        base.message.as_deref(),
        Some("cannot process files in base directory")
    );
    assert_eq!(value(&c, PATIENT_ID).as_deref(), Some("ORIGINAL"));

    let rerun = patient_id::set_patient_ids(&root, &FileFilter::accept_all());
    assert_eq!(rerun.status_of(&a), Some(FileStatus::Skip));
}

#[test]
fn clear_preamble_zeroes_only_the_preamble() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("pre.dcm");
    write_test_dicom(&path, "DOE^JOHN", "12345");
    let mut bytes = std::fs::read(&path).expect("read");
    bytes[..128].fill(0x5A);
    std::fs::write(&path, &bytes).expect("dirty preamble");

    preamble::clear_preamble(&path).expect("clear");
    let cleared = std::fs::read(&path).expect("read");
    assert_eq!(cleared.len(), bytes.len());
    assert!(cleared[..128].iter().all(|b| *b == 0));
    assert_eq!(&cleared[128..], &bytes[128..]);

    preamble::clear_preamble(&path).expect("clear again");
    assert_eq!(std::fs::read(&path).expect("read"), cleared);
}

#[test]
fn clear_preamble_rejects_missing_magic() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("junk.dcm");
    write_test_dicom(&path, "DOE^JOHN", "12345");
    let mut bytes = std::fs::read(&path).expect("read");
    bytes[128..132].copy_from_slice(b"JUNK");
    std::fs::write(&path, &bytes).expect("corrupt magic");

    let err = preamble::clear_preamble(&path).expect_err("must fail");
    assert!(matches!(err, EditorError::NotDicom(_)));
    assert_eq!(std::fs::read(&path).expect("read"), bytes);
}

#[test]
fn lookup_miss_quarantines_without_output() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("scan.dcm");
    let output = dir.path().join("scan-no-phi.dcm");
    write_test_dicom(&input, "DOE^JOHN", "12345");
    let script = compile(&write_script(
        dir.path(),
        r#" <e en="T" t="00100020">@lookup(this,ptid)</e>"#,
    ));
    let lookup = LookupTable::new(Properties::parse("ptid/99999=TRIAL-1\n"));

    let status = anonymize(
        &input,
        &output,
        &script,
        &lookup,
        None,
        AnonymizeOptions::default(),
    )
    .expect("anonymize");
    assert!(matches!(status, AnonymizeStatus::Quarantine(_)));
    assert!(!output.exists());
}

#[test]
fn lookup_hit_substitutes_pseudonym() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("scan.dcm");
    write_test_dicom(&input, "DOE^JOHN", "12345");
    let script = compile(&write_script(
        dir.path(),
        r#" <e en="T" t="00100020">@lookup(this,ptid)</e>"#,
    ));
    let lookup = LookupTable::new(Properties::parse("ptid/12345=TRIAL-7\n"));

    anonymize(
        &input,
        &input,
        &script,
        &lookup,
        None,
        AnonymizeOptions::default(),
    )
    .expect("anonymize");
    assert_eq!(value(&input, PATIENT_ID).as_deref(), Some("TRIAL-7"));
}

#[test]
fn suffix_policy_is_idempotent_across_reruns() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("study");
    std::fs::create_dir_all(&root).expect("mkdir");
    let scan = root.join("scan.dcm");
    let anon = root.join("scan-no-phi.dcm");
    write_test_dicom(&scan, "DOE^JOHN", "12345");
    let script = compile(&write_script(
        dir.path(),
        r#" <e en="T" t="00100010">@empty()</e>"#,
    ));
    let lookup = LookupTable::default();

    let run = || {
        let anonymizer = Anonymizer::new(&script, &lookup, None, AnonymizeOptions::default());
        batch::run(
            &root,
            &mut Operation::Anonymize(anonymizer),
            &FileFilter::new(["dcm"]),
            false,
            RenamePolicy::SuffixNoPhi,
        )
    };

    let first = run();
    assert_eq!(first.results.len(), 1);
    assert_eq!(first.status_of(&scan), Some(FileStatus::Ok));
    assert!(anon.exists());
    let first_bytes = std::fs::read(&anon).expect("read");

    let second = run();
    assert_eq!(second.results.len(), 2);
    assert_eq!(second.status_of(&scan), Some(FileStatus::Ok));
    assert_eq!(second.status_of(&anon), Some(FileStatus::Skip));
    assert_eq!(std::fs::read(&anon).expect("read"), first_bytes);
}

#[test]
fn integer_table_keeps_pseudonyms_stable() {
    let dir = tempdir().expect("tempdir");
    let table_path = dir.path().join("integers.json");
    let script = compile(&write_script(
        dir.path(),
        r#" <e en="T" t="00100020">PT-@integer(this,ptid,4)</e>"#,
    ));
    let lookup = LookupTable::default();

    let mut assigned = Vec::new();
    for (name, id) in [("a.dcm", "111"), ("b.dcm", "222"), ("c.dcm", "111")] {
        let path = dir.path().join(name);
        write_test_dicom(&path, "DOE^JOHN", id);
        // Reopen the table for every file, as separate runs would.
        let mut table = IntegerTable::open(&table_path).expect("open table");
        let report = batch::run(
            &path,
            &mut Operation::Anonymize(Anonymizer::new(
                &script,
                &lookup,
                Some(&mut table),
                AnonymizeOptions::default(),
            )),
            &FileFilter::accept_all(),
            false,
            RenamePolicy::InPlace,
        );
        assert_eq!(report.status_of(&path), Some(FileStatus::Ok));
        assigned.push(value(&path, PATIENT_ID).expect("id"));
    }
    assert_eq!(assigned, vec!["PT-0001", "PT-0002", "PT-0001"]);
    assert!(table_path.exists());
}

#[test]
fn sop_instance_uid_naming_and_meta_follow_the_new_uid() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("scan.dcm");
    write_test_dicom(&input, "DOE^JOHN", "12345");
    let script = compile(&write_script(
        dir.path(),
        r#" <p t="UIDROOT">1.2.3.4</p>
 <e en="T" t="00080018" n="SOPInstanceUID">@hashuid(@UIDROOT,this)</e>"#,
    ));

    let status = anonymize(
        &input,
        &input,
        &script,
        &LookupTable::default(),
        None,
        AnonymizeOptions {
            force_ivrle: true,
            rename_to_sop_instance_uid: true,
        },
    )
    .expect("anonymize");
    let AnonymizeStatus::Ok { output } = status else {
        panic!("expected OK, got {status:?}");
    };

    let obj = open_file(&output).expect("open renamed output");
    let uid = obj.element_str(SOP_INSTANCE_UID).expect("uid");
    assert!(uid.starts_with("1.2.3.4."));
    assert_eq!(output, dir.path().join(format!("{uid}.dcm")));
    assert_eq!(
        obj.meta().media_storage_sop_instance_uid.trim_end_matches('\0'),
        uid
    );
    assert_eq!(
        obj.meta().transfer_syntax().trim_end_matches('\0'),
        "1.2.840.10008.1.2"
    );
    assert!(input.exists());
}

#[test]
fn unspecified_elements_respect_group_keeps() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("scan.dcm");
    write_test_dicom(&path, "DOE^JOHN", "12345");
    let script = compile(&write_script(
        dir.path(),
        r#" <e en="T" t="00100020">@keep()</e>
 <e en="F" t="00100010">@keep()</e>
 <r en="T" t="unspecifiedelements">Remove unchecked elements</r>
 <k en="T" t="group28">Keep group 28</k>
 <k en="T" t="group7fe0">Keep pixels</k>"#,
    ));

    anonymize(
        &path,
        &path,
        &script,
        &LookupTable::default(),
        None,
        AnonymizeOptions::default(),
    )
    .expect("anonymize");

    let obj = open_file(&path).expect("reopen");
    assert_eq!(obj.element_str(PATIENT_ID).as_deref(), Some("12345"));
    assert!(!obj.has_element(PATIENT_NAME));
    assert!(!obj.has_element(Tag(0x0008, 0x0060)));
    assert!(obj.has_element(Tag(0x0028, 0x0010)));
    assert!(obj.has_element(Tag(0x7fe0, 0x0010)));
}

#[test]
fn non_dicom_input_is_skipped() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("notes.dcm");
    std::fs::write(&input, b"plain text").expect("seed");
    let script = compile(&write_script(dir.path(), ""));
    let status = anonymize(
        &input,
        &input,
        &script,
        &LookupTable::default(),
        None,
        AnonymizeOptions::default(),
    )
    .expect("anonymize");
    assert!(matches!(status, AnonymizeStatus::Skip(_)));
    assert_eq!(std::fs::read(&input).expect("read"), b"plain text");
}

#[test]
fn fix_vrs_retypes_unknown_elements_on_disk() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("un.dcm");
    write_test_dicom(&path, "DOE^JOHN", "12345");
    let mut obj = open_file(&path).expect("open");
    obj.put(DataElement::new(
        Tag(0x0008, 0x0070),
        VR::UN,
        PrimitiveValue::from(b"ACME".to_vec()),
    ));
    obj.write_to_file(&path).expect("write UN element");

    let outcome = fix_vr::fix_vrs(&path).expect("fix");
    assert!(matches!(outcome, fix_vr::FixOutcome::Fixed(n) if n >= 1));
    let fixed = open_file(&path).expect("reopen");
    assert_eq!(fixed.element_vr(Tag(0x0008, 0x0070)), Some(VR::LO));
    assert_eq!(fixed.element_str(Tag(0x0008, 0x0070)).as_deref(), Some("ACME"));

    assert_eq!(fix_vr::fix_vrs(&path).expect("again"), fix_vr::FixOutcome::Unchanged);
}

#[test]
fn element_listing_and_manual_edit() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("edit.dcm");
    write_test_dicom(&path, "DOE^JOHN", "12345");

    let tag = elements::parse_tag("PatientID").expect("tag");
    elements::set_element(&path, tag, "EDITED").expect("set");
    assert_eq!(value(&path, PATIENT_ID).as_deref(), Some("EDITED"));

    let rows = elements::list_elements(&path, 4, 64).expect("list");
    let row = rows
        .iter()
        .find(|r| r.tag == "(0010,0020)")
        .expect("PatientID row");
    assert_eq!(row.keyword, "PatientID");
    assert_eq!(row.vr, "LO");
    assert_eq!(row.preview, "EDITED");
}

#[test]
fn script_edits_survive_save_and_load() {
    let dir = tempdir().expect("tempdir");
    let path = write_script(
        dir.path(),
        r#" <p t="PROFILENAME">CTP Clinical Trial Default</p>
 <e en="T" t="00100010" n="PatientName">@empty()</e>
 <e en="T" t="00100020" n="PatientID">@lookup(this,ptid)</e>
 <r en="T" t="privategroups">Remove private groups</r>
 <k en="T" t="group18">Keep group 18</k>"#,
    );
    let mut model = script::load(&path).expect("load");
    let key = script::DirectiveKey::new(script::DirectiveKind::Element, "00100020");
    model.set_enabled(&key, false).expect("disable");
    script::save(&model, &path).expect("save");

    let reloaded = script::load(&path).expect("reload");
    assert_eq!(reloaded, model);
    let order: Vec<String> = reloaded
        .directives()
        .iter()
        .map(|d| d.key().to_string())
        .collect();
    assert_eq!(
        order,
        vec![
            "p.PROFILENAME",
            "e.00100010",
            "e.00100020",
            "r.privategroups",
            "k.group18"
        ]
    );
    assert_eq!(compile(&path).rules.len(), 1);
}

#[test]
fn uid_named_files_are_anonymized_once() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("study");
    std::fs::create_dir_all(&root).expect("mkdir");
    let scan = root.join("1.2.840.5");
    let anon = root.join("1.2.840.5-no-phi");
    write_test_dicom(&scan, "DOE^JOHN", "12345");
    let script = compile(&write_script(
        dir.path(),
        r#" <e en="T" t="00100010">@empty()</e>"#,
    ));
    let lookup = LookupTable::default();

    for _ in 0..3 {
        let anonymizer = Anonymizer::new(&script, &lookup, None, AnonymizeOptions::default());
        batch::run(
            &root,
            &mut Operation::Anonymize(anonymizer),
            &FileFilter::accept_all(),
            false,
            RenamePolicy::SuffixNoPhi,
        );
    }

    let mut names: Vec<String> = std::fs::read_dir(&root)
        .expect("read dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["1.2.840.5", "1.2.840.5-no-phi"]);
    assert_eq!(value(&anon, PATIENT_NAME).as_deref(), Some(""));
}

#[test]
fn overlay_groups_are_removed() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("overlay.dcm");
    write_test_dicom(&path, "DOE^JOHN", "12345");
    let mut obj = open_file(&path).expect("open");
    obj.put(DataElement::new(
        Tag(0x6000, 0x0010),
        VR::US,
        PrimitiveValue::from(2_u16),
    ));
    obj.put(DataElement::new(
        Tag(0x6002, 0x3000),
        VR::OW,
        PrimitiveValue::from(vec![0u8, 1, 0, 1]),
    ));
    obj.write_to_file(&path).expect("write overlays");
    let script = compile(&write_script(
        dir.path(),
        r#" <r en="T" t="overlays">Remove overlays</r>"#,
    ));

    anonymize(
        &path,
        &path,
        &script,
        &LookupTable::default(),
        None,
        AnonymizeOptions::default(),
    )
    .expect("anonymize");

    let obj = open_file(&path).expect("reopen");
    assert!(!obj.has_element(Tag(0x6000, 0x0010)));
    assert!(!obj.has_element(Tag(0x6002, 0x3000)));
    assert_eq!(obj.element_str(PATIENT_NAME).as_deref(), Some("DOE^JOHN"));
    assert!(obj.has_element(Tag(0x7fe0, 0x0010)));
}

#[test]
fn padded_parameter_bodies_reach_the_output() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("scan.dcm");
    write_test_dicom(&path, "DOE^JOHN", "12345");
    let script_path = write_script(
        dir.path(),
        r#" <p t="SITE">S01 </p>
 <e en="T" t="00100020">@SITE-@hash(this,4)</e>"#,
    );
    let model = script::load(&script_path).expect("load");
    assert_eq!(model.param("SITE"), Some("S01 "));
    script::save(&model, &script_path).expect("save");
    assert_eq!(script::load(&script_path).expect("reload"), model);

    anonymize(
        &path,
        &path,
        &compile(&script_path),
        &LookupTable::default(),
        None,
        AnonymizeOptions::default(),
    )
    .expect("anonymize");

    let id = value(&path, PATIENT_ID).expect("PatientID");
    assert_eq!(id, format!("S01 -{}", hash_value("12345", 4)));
}
